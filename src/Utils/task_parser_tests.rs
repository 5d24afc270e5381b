#[cfg(test)]
mod tests {
    use crate::Utils::task_parser::{
        DocumentMap, Value, filter_comments, get_value, get_values, parse_document_as,
        parse_key, parse_key_value_pair, parse_section, parse_title, parse_value,
        parse_value_list,
    };
    use std::collections::HashMap;

    #[test]
    fn test_parse_title_and_key() {
        let (remaining, title) = parse_title("refinement\n rel_error_tol: 1e-5").unwrap();
        assert_eq!(title, "refinement");
        assert_eq!(remaining, "rel_error_tol: 1e-5");

        let (remaining, key) = parse_key("max_add_nodes_per_pass: 50").unwrap();
        assert_eq!(key, "max_add_nodes_per_pass");
        assert_eq!(remaining, ": 50");
    }

    #[test]
    fn test_parse_value_types() {
        assert_eq!(parse_value("15, x").unwrap(), (", x", Value::Integer(15)));
        assert_eq!(parse_value("1e-5").unwrap(), ("", Value::Float(1e-5)));
        assert_eq!(parse_value("false;").unwrap(), (";", Value::Boolean(false)));
        assert_eq!(
            parse_value("RungeKutta8 next").unwrap(),
            (" next", Value::String("RungeKutta8".to_string()))
        );
    }

    #[test]
    fn test_parse_value_list_and_pair() {
        let (remaining, values) = parse_value_list("0.0, 0.25 , 1").unwrap();
        assert_eq!(remaining, "");
        assert_eq!(values, vec![Value::Float(0.0), Value::Float(0.25), Value::Integer(1)]);

        let (remaining, (key, values)) =
            parse_key_value_pair("mesh_interval_num_points : 4, 6\nnext: 1").unwrap();
        assert_eq!(key, "mesh_interval_num_points");
        assert_eq!(values, vec![Value::Integer(4), Value::Integer(6)]);
        assert_eq!(remaining, "next: 1");
    }

    #[test]
    fn test_parse_section_stops_at_next_title() {
        let input = "collocation\n method: Trapezoid\n num_state_vars: 2\nlogging\n level: info";
        let (remaining, (title, pairs)) = parse_section(input).unwrap();
        assert_eq!(title, "collocation");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("num_state_vars".to_string(), vec![Value::Integer(2)]));
        assert!(remaining.starts_with("logging"));
    }

    #[test]
    fn test_filter_comments() {
        let filtered = filter_comments("# header\ncollocation\n// note\n method: Trapezoid\n\n% x\n");
        assert_eq!(filtered, "collocation\n method: Trapezoid");
    }

    #[test]
    fn test_document_with_template() {
        let input = "
        # collocation task
        collocation
         method: RungeKutta4
         mesh_interval_fractions: 0, 0.5, 1
        refinement
         rel_error_tol: 1e-7
         cap_policy: Clamp
        ";
        let mut template: DocumentMap = HashMap::new();
        let mut logging = HashMap::new();
        logging.insert("level".to_string(), None);
        template.insert("logging".to_string(), logging);

        let document = parse_document_as(input, Some(&template)).unwrap();
        assert_eq!(
            get_value(&document, "collocation", "method").and_then(|v| v.as_string().cloned()),
            Some("RungeKutta4".to_string())
        );
        let fractions: Vec<f64> = get_values(&document, "collocation", "mesh_interval_fractions")
            .unwrap()
            .iter()
            .filter_map(Value::as_float)
            .collect();
        assert_eq!(fractions, vec![0.0, 0.5, 1.0]);
        assert_eq!(
            get_value(&document, "refinement", "rel_error_tol").and_then(Value::as_float),
            Some(1e-7)
        );
        assert!(document["logging"]["level"].is_none());
        assert!(get_value(&document, "logging", "level").is_none());
    }

    #[test]
    fn test_malformed_document() {
        assert!(parse_document_as("", None).is_err());
        assert!(parse_document_as("collocation\n : RungeKutta4", None).is_err());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Integer(3).as_usize(), Some(3));
        assert_eq!(Value::Integer(-3).as_usize(), None);
        assert_eq!(Value::Integer(3).as_float(), Some(3.0));
        assert_eq!(Value::Boolean(true).as_boolean(), Some(true));
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
    }
}
