use std::fmt;

use serde::Serialize;

/// Build metadata captured by `build.rs` at compile time
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
    pub target: Option<&'static str>,
    pub host: Option<&'static str>,
}

impl BuildInfo {
    pub const fn new(
        build_profile: &'static str,
        build_features: &'static str,
        version: &'static str,
        build_timestamp: &'static str,
        rust_version: &'static str,
        target: Option<&'static str>,
        host: Option<&'static str>,
    ) -> Self {
        Self {
            build_profile,
            build_features,
            version,
            build_timestamp,
            rust_version,
            target,
            host,
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} build, features: {}) built {} with {}",
            self.version,
            self.build_profile,
            self.build_features,
            self.build_timestamp,
            self.rust_version
        )?;
        if let Some(target) = self.target {
            write!(f, " for {}", target)?;
        }
        Ok(())
    }
}

/// Build info of the crate this macro is expanded in; that crate's
/// `build.rs` must export the same variables as this one's.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo::new(
            env!("BUILD_PROFILE"),
            env!("BUILD_FEATURES"),
            env!("REPO_VERSION"),
            env!("BUILD_TIMESTAMP"),
            env!("RUST_VERSION"),
            option_env!("BUILD_TARGET"),
            option_env!("BUILD_HOST"),
        )
    };
}

/// Build info of this library
pub fn build_info() -> BuildInfo {
    build_info!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_display() {
        let info = BuildInfo::new("release", "none", "v1.2.3", "2024-01-01T00:00:00Z", "rustc 1.80.0", Some("x86_64-unknown-linux-gnu"), None);
        assert_eq!(
            info.to_string(),
            "v1.2.3 (release build, features: none) built 2024-01-01T00:00:00Z with rustc 1.80.0 for x86_64-unknown-linux-gnu"
        );
        assert!(!build_info().version.is_empty());
    }
}
