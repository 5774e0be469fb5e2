//! Human-readable error descriptions and structured JSON error formatting.

use lcflow_core::CalError;

pub fn cal_error_name(err: &CalError) -> &'static str {
    match err {
        CalError::Hardware(_) => "Hardware",
        CalError::State(_) => "State",
        CalError::Timeout => "Timeout",
        CalError::Config(_) => "Config",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(ce) = err.downcast_ref::<CalError>() {
        return match ce {
            CalError::Timeout => {
                "What happened: Calibration timed out waiting for a sampling epoch.\nLikely causes: The disc never started spinning, the sampling engine lost its clock, or the run was interrupted (Ctrl-C / timeout guard).\nHow to fix: Start the disc when the display shows 8888, and consider raising recal.timeout_ms in the config.".to_string()
            }
            CalError::Hardware(msg) => format!(
                "What happened: The analog front-end reported a fault ({msg}).\nLikely causes: DAC or comparator access failed, or the peripheral lost power mid-epoch.\nHow to fix: Check the sensor board connection and power, then rerun."
            ),
            CalError::State(msg) => format!(
                "What happened: An operation ran from an invalid front-end state ({msg}).\nLikely causes: The sampling engine was disabled while a stage was waiting on it, or stages ran out of order.\nHow to fix: Rerun the calibration from the start; report this if it persists."
            ),
            CalError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
            ),
        };
    }

    // String-based heuristics for errors coming from init or file loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    // Baselines CSV header special-case
    if lower.contains("baselines csv must have headers") {
        return "Invalid headers in baselines CSV. Expected 'channel,base,noise'.".to_string();
    }

    if lower.contains("baseline") {
        return format!(
            "What happened: The persisted baselines file is unusable ({msg}).\nLikely causes: A stale, truncated, or hand-edited CSV.\nHow to fix: Rerun `lcflow calibrate --save <FILE>` to regenerate it."
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing file.\nHow to fix: Pass --config with the TOML path. Original: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map CalError (if present) to stable exit codes; other errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ce) = err.downcast_ref::<CalError>() {
        return match ce {
            CalError::Config(_) => 2,
            CalError::State(_) => 3,
            CalError::Timeout => 4,
            CalError::Hardware(_) => 5,
        };
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(ce) = err.downcast_ref::<CalError>() {
        return json!({ "reason": cal_error_name(ce), "message": humanize(err) }).to_string();
    }

    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
