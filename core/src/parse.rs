//! Value parsing helpers for the keyed config format: comma-separated
//! lists consumed front-to-back, duration strings, booleans, directions.

/// Remove and return everything before the first `,` (or the whole string).
pub fn pop_first_string(val: &mut String) -> String {
    match val.find(',') {
        Some(idx) => {
            let first = val[..idx].trim().to_string();
            *val = val[idx + 1..].to_string();
            first
        }
        None => {
            let first = val.trim().to_string();
            val.clear();
            first
        }
    }
}

pub fn pop_first_int(val: &mut String) -> i32 {
    to_int(&pop_first_string(val), 0)
}

pub fn pop_first_float(val: &mut String) -> f32 {
    pop_first_string(val).parse::<f32>().unwrap_or(0.0)
}

pub fn to_int(s: &str, default: i32) -> i32 {
    s.trim().parse::<i32>().unwrap_or(default)
}

pub fn to_float(s: &str, default: f32) -> f32 {
    s.trim().parse::<f32>().unwrap_or(default)
}

pub fn to_bool(s: &str) -> bool {
    matches!(s.trim(), "true" | "1" | "yes")
}

/// Parse a duration into ticks. Accepts raw tick counts (`"90"`),
/// milliseconds (`"750ms"`), and seconds (`"2s"`); the latter two are
/// converted using the configured frame rate. Durations of at least one
/// unit never round down to zero ticks.
pub fn to_duration(s: &str, max_frames_per_sec: u32) -> u32 {
    let s = s.trim();
    let fps = max_frames_per_sec.max(1) as f32;

    let ticks = if let Some(ms) = s.strip_suffix("ms") {
        to_float(ms, 0.0) * fps / 1000.0
    } else if let Some(secs) = s.strip_suffix('s') {
        to_float(secs, 0.0) * fps
    } else {
        return to_int(s, 0).max(0) as u32;
    };

    if ticks > 0.0 && ticks < 1.0 {
        1
    } else {
        ticks.round().max(0.0) as u32
    }
}

/// Parse a direction: either a number in 0..8 or a compass name.
pub fn to_direction(s: &str) -> u8 {
    match s.trim() {
        "N" => 3,
        "NE" => 4,
        "E" => 5,
        "SE" => 6,
        "S" => 7,
        "SW" => 0,
        "W" => 1,
        "NW" => 2,
        other => {
            let dir = to_int(other, 0);
            if (0..8).contains(&dir) {
                dir as u8
            } else {
                log::warn!("parse: '{}' is not a valid direction, defaulting to 0", s);
                0
            }
        }
    }
}

/// Parse "min,max" ranges where a single value means an exact amount.
pub fn to_range(val: &mut String) -> (i32, i32) {
    let min = pop_first_int(val).max(0);
    let max = if val.is_empty() {
        min
    } else {
        pop_first_int(val).max(min)
    };
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_first_walks_the_list() {
        let mut val = "10, 20,30".to_string();
        assert_eq!(pop_first_int(&mut val), 10);
        assert_eq!(pop_first_int(&mut val), 20);
        assert_eq!(pop_first_int(&mut val), 30);
        assert_eq!(pop_first_string(&mut val), "");
    }

    #[test]
    fn durations_convert_at_load() {
        assert_eq!(to_duration("90", 60), 90);
        assert_eq!(to_duration("2s", 60), 120);
        assert_eq!(to_duration("750ms", 60), 45);
        // sub-tick durations round up to a single tick
        assert_eq!(to_duration("1ms", 60), 1);
        assert_eq!(to_duration("0", 60), 0);
    }

    #[test]
    fn direction_names_and_numbers() {
        assert_eq!(to_direction("N"), 3);
        assert_eq!(to_direction("SW"), 0);
        assert_eq!(to_direction("6"), 6);
        assert_eq!(to_direction("11"), 0);
    }

    #[test]
    fn range_single_value_is_exact() {
        let mut v = "4".to_string();
        assert_eq!(to_range(&mut v), (4, 4));
        let mut v = "2,5".to_string();
        assert_eq!(to_range(&mut v), (2, 5));
        let mut v = "5,2".to_string();
        assert_eq!(to_range(&mut v), (5, 5));
    }
}
