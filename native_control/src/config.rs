use std::time::Duration;

/* Configuration toggles for query controls */
#[derive(Clone, Debug, Default)]
pub struct ControlConfig {
    /* Timeout for pushes and pulls when a chain does not set its own */
    pub default_timeout: Option<Duration>,
    /* Emit a trace event for every executed accessor node */
    pub trace_calls: bool,
}
