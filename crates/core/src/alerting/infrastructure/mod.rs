pub mod http_alert_sink;
pub mod in_memory_alert_sink;
