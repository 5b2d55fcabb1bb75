/// Trigger a check cycle now (POST)
pub const PATH_CHECK: &str = "/v1/check";

/// Currently-down sites (GET)
pub const PATH_DOWN: &str = "/v1/down";

/// Servers with several down sites at once (GET, `?min=N`)
pub const PATH_SERVERS: &str = "/v1/servers";

/// Daemon liveness (GET)
pub const PATH_HEALTH: &str = "/v1/health";
