//! Route names for the dispatcher and processor HTTP surfaces
//!
//! Every operation is `POST /<route>` with a JSON body, except the read-only
//! listings and health checks which are `GET`.

/// Dispatcher-facing routes
pub mod dispatcher {
    pub const REGISTER_PROCESSOR: &str = "register_processor";
    pub const UNREGISTER_PROCESSOR: &str = "unregister_processor";
    pub const PROCESSORS: &str = "processors";
    pub const UNASSIGNED_PROCESSORS: &str = "unassigned_processors";
    pub const PROCESSOR: &str = "processor";
    pub const PROCESSOR_MARKETS: &str = "processor_markets";
    pub const ASSIGN_MARKET: &str = "assign_market";
    pub const LOAD_TAXONOMY: &str = "load_taxonomy";
    pub const BATCH_DETAIL_EXPORT: &str = "batch_detail_export";
    pub const BATCH_EXPORT: &str = "batch_export";
    pub const FOLDER_ACCESS: &str = "folder_access";
}

/// Processor-facing routes
pub mod processor {
    pub const ASSIGN_MARKET: &str = "assign_market";
    pub const RELEASE_MARKET: &str = "release_market";
    pub const LOAD_TAXONOMY: &str = "load_taxonomy";
    pub const BATCH_DETAIL_EXPORT: &str = "batch_detail_export";
    pub const BATCH_EXPORT: &str = "batch_export";
    pub const FOLDER_ACCESS: &str = "folder_access";
}

pub const HEALTH: &str = "health";

/// Join a base URI and a route name, tolerating a trailing slash on the base
pub fn endpoint(base_uri: &str, route: &str) -> String {
    format!("{}/{}", base_uri.trim_end_matches('/'), route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("http://proc-1:9100/", dispatcher::ASSIGN_MARKET),
            "http://proc-1:9100/assign_market"
        );
        assert_eq!(
            endpoint("http://proc-1:9100", processor::FOLDER_ACCESS),
            "http://proc-1:9100/folder_access"
        );
    }

    #[test]
    fn test_route_names_are_path_segments() {
        let routes = [
            dispatcher::REGISTER_PROCESSOR,
            dispatcher::BATCH_DETAIL_EXPORT,
            processor::RELEASE_MARKET,
            HEALTH,
        ];
        for route in routes {
            assert!(!route.contains('/'), "route '{route}' must be one segment");
            assert!(!route.is_empty());
        }
    }
}
