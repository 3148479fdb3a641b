use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Ingestion listeners only.
    Updates,
    /// Query and listing listener only.
    Queries,
    All,
}

impl Role {
    pub fn serves_updates(self) -> bool {
        matches!(self, Role::Updates | Role::All)
    }

    pub fn serves_queries(self) -> bool {
        matches!(self, Role::Queries | Role::All)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "metrics-gateway",
    version,
    about = "Metrics ingestion and query gateway"
)]
pub struct Args {
    #[arg(long, value_enum, default_value_t = Role::All)]
    pub role: Role,
    /// JSON config file; falls back to GATEWAY_CONFIG_PATH.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_all_roles() {
        let args = Args::parse_from(["metrics-gateway"]);
        assert_eq!(args.role, Role::All);
        assert!(args.role.serves_updates() && args.role.serves_queries());

        let args = Args::parse_from(["metrics-gateway", "--role", "queries", "--config", "gw.json"]);
        assert_eq!(args.role, Role::Queries);
        assert!(!args.role.serves_updates());
        assert_eq!(args.config, Some(PathBuf::from("gw.json")));
    }
}
