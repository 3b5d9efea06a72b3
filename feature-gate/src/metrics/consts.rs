// Gate evaluation
pub const GATE_EVALUATIONS_COUNTER: &str = "gate_evaluations_total";
pub const FLAG_SOURCE_ERRORS_COUNTER: &str = "gate_flag_source_errors_total";
pub const FLAG_CHANGE_NOTIFICATIONS_COUNTER: &str = "gate_flag_change_notifications_total";
pub const DECISION_REFRESH_TIME: &str = "gate_decision_refresh_time";

// Performance monitoring
pub const PERFORMANCE_SIGNAL_GAUGE: &str = "gate_performance_signal";
pub const KILL_SWITCH_ARMED_GAUGE: &str = "gate_kill_switch_armed";
pub const KILL_SWITCH_TRANSITIONS_COUNTER: &str = "gate_kill_switch_transitions_total";
pub const LATENCY_SAMPLE_HISTOGRAM: &str = "gate_latency_sample";
pub const SIMULATION_MODE_CHANGES_COUNTER: &str = "gate_simulation_mode_changes_total";

// Telemetry forwarding
pub const TELEMETRY_SENT_COUNTER: &str = "gate_telemetry_sent_total";
pub const TELEMETRY_DROPPED_COUNTER: &str = "gate_telemetry_dropped_total";
pub const TELEMETRY_SINK_ERRORS_COUNTER: &str = "gate_telemetry_sink_errors_total";
