pub const APP_NAME: &str = "agri-sync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory name used under the platform data/config roots.
pub const APP_DIR: &str = "agri-sync";

pub fn version_label() -> String {
    format!("v{APP_VERSION}")
}

/// User agent sent with every backend request.
pub fn user_agent() -> String {
    format!("{APP_NAME}/{}", version_label())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_name_and_version() {
        let agent = user_agent();
        assert!(agent.starts_with("agri-sync/v"));
        assert!(agent.ends_with(APP_VERSION));
    }
}
