pub mod create;
pub mod daemon;
pub mod export;
pub mod import;
pub mod init;
pub mod list;
pub mod lookup;
pub mod popularity;
pub mod results;
pub mod show;
pub mod subscribe;
pub mod version;

pub use create::Create;
pub use daemon::Daemon;
pub use export::Export;
pub use import::Import;
pub use init::Init;
pub use list::List;
pub use lookup::Lookup;
pub use popularity::Popularity;
pub use results::Results;
pub use show::Show;
pub use subscribe::Subscribe;
pub use version::Version;

/// Render an epoch-millisecond time for humans; 0 means it never happened
pub(crate) fn format_time(ms: i64) -> String {
    if ms <= 0 {
        return "never".to_string();
    }
    match chrono::DateTime::from_timestamp_millis(ms) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "never");
        assert_eq!(format_time(86_400_000), "1970-01-02 00:00:00 UTC");
    }
}
