use crate::config::parse_duration;

/// Accept a quiet window such as `45s`, `10m` or `1.5h`. The text is kept
/// as written and parsed again during configuration resolution.
pub fn parse_window(s: &str) -> Result<String, String> {
    match parse_duration(s) {
        Some(_) => Ok(s.trim().to_string()),
        None => Err(format!(
            "invalid duration '{s}': use a positive number with an optional unit (ms, s, m, h)"
        )),
    }
}

/// Accept a TCP port other than 0.
pub fn parse_port(s: &str) -> Result<u16, String> {
    match s.trim().parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".to_string()),
        Ok(port) => Ok(port),
        Err(_) => Err(format!("invalid port '{s}'")),
    }
}
