use std::collections::HashMap;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as usize, rounded, with a minimum value
pub fn get_param_usize(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Boolean parameters travel as 0/1 in the parameter map
pub fn get_param_bool(params: &HashMap<String, f64>, key: &str, default: bool) -> bool {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v >= 0.5)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_params_round_at_half() {
        let mut params = HashMap::new();
        params.insert("trailing_stop".to_string(), 0.6);
        assert!(get_param_bool(&params, "trailing_stop", false));
        params.insert("trailing_stop".to_string(), 0.4);
        assert!(!get_param_bool(&params, "trailing_stop", true));
        assert!(get_param_bool(&params, "missing", true));
    }

    #[test]
    fn usize_params_round_and_respect_the_minimum() {
        let mut params = HashMap::new();
        params.insert("period".to_string(), 7.6);
        assert_eq!(get_param_usize(&params, "period", 20, 2), 8);
        params.insert("period".to_string(), 0.4);
        assert_eq!(get_param_usize(&params, "period", 20, 2), 2);
        assert_eq!(get_param_usize(&params, "missing", 20, 2), 20);
    }
}
