use clap::Args;

use common::build_info;
use common::discovery::ASSOCIATION_RECORD_SIZE;
use common::envelope::MAX_SCHEMA_VERSION;

#[derive(Args, Debug, Clone)]
pub struct Version {
    /// Also print the build info as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("build info could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let info = build_info!();
        if self.json {
            return Ok(serde_json::to_string_pretty(&serde_json::json!({
                "build": info,
                "envelope_schema": MAX_SCHEMA_VERSION,
                "association_record_size": ASSOCIATION_RECORD_SIZE,
            }))?);
        }
        Ok(format!(
            "subs {}\n\
             - Envelope schema: up to v{}\n\
             - Association records: {} bytes",
            info, MAX_SCHEMA_VERSION, ASSOCIATION_RECORD_SIZE
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::op::testing;
    use crate::cli::op::Op;

    #[tokio::test]
    async fn test_version_reports_wire_formats() {
        let (_temp, ctx) = testing::context();
        let text = Version { json: false }.execute(&ctx).await.unwrap();
        assert!(text.starts_with(&format!("subs {}", env!("REPO_VERSION"))));
        assert!(text.contains(&format!("up to v{}", MAX_SCHEMA_VERSION)));

        let json = Version { json: true }.execute(&ctx).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["envelope_schema"], MAX_SCHEMA_VERSION);
        assert_eq!(parsed["build"]["version"], env!("REPO_VERSION"));
    }
}
