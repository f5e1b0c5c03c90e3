use super::*;
use chrono::Utc;

fn runtime_event(severity: i64) -> SecurityEvent {
    let mut event = SecurityEvent::new("e1", "runtime_security", Utc::now());
    event.severity = severity;
    event.host = Some("node-1".to_string());
    event.mitre_ids = vec!["T1190".to_string(), "T1059".to_string()];
    event
}

// ============================================================================
// Parsing
// ============================================================================

mod parse_tests {
    use super::*;

    #[test]
    fn test_parse_single_term() {
        let query = Query::parse("type = runtime_security").unwrap();

        let terms = query.terms();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].field, "type");
        assert_eq!(terms[0].operator, Operator::Eq);
        assert_eq!(terms[0].value, "runtime_security");
        assert_eq!(query.as_str(), "type = runtime_security");
    }

    #[test]
    fn test_parse_all_operators() {
        for (text, expected) in [
            ("severity = 1", Operator::Eq),
            ("severity != 1", Operator::NotEq),
            ("severity < 1", Operator::Lt),
            ("severity <= 1", Operator::Le),
            ("severity > 1", Operator::Gt),
            ("severity >= 1", Operator::Ge),
        ] {
            let query = Query::parse(text).unwrap();
            assert_eq!(query.terms()[0].operator, expected, "{text}");
        }
    }

    #[test]
    fn test_parse_compound_with_lowercase_keywords() {
        let query =
            Query::parse("(type = waf or type = alert) and not host = \"node 1\"").unwrap();

        let values: Vec<_> = query.terms().iter().map(|t| t.value.clone()).collect();
        assert_eq!(values, vec!["waf", "alert", "node 1"]);
    }

    #[test]
    fn test_leading_operator_is_unexpected_token() {
        let err = Query::parse("= runtime_security").unwrap_err();

        assert!(matches!(err, QueryError::UnexpectedToken { .. }));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let err = Query::parse("type = waf waf").unwrap_err();
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_incomplete_term_is_unexpected_end() {
        assert_eq!(Query::parse("type =").unwrap_err(), QueryError::UnexpectedEnd);
        assert_eq!(
            Query::parse("(type = waf").unwrap_err(),
            QueryError::UnexpectedEnd
        );
    }

    #[test]
    fn test_empty_query_is_rejected() {
        assert_eq!(Query::parse("   ").unwrap_err(), QueryError::Empty);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Query::parse("host = \"node").unwrap_err();
        assert_eq!(err, QueryError::UnterminatedString { position: 7 });
    }

    #[test]
    fn test_invalid_character() {
        let err = Query::parse("type ~ waf").unwrap_err();
        assert_eq!(
            err,
            QueryError::InvalidCharacter {
                character: '~',
                position: 5
            }
        );
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validate_tests {
    use super::*;

    #[test]
    fn test_known_type_is_valid() {
        let query = Query::parse("type = runtime_security AND severity >= 50").unwrap();
        assert!(query.validate(&SecurityEventSchema).is_ok());
    }

    #[test]
    fn test_misspelled_type_value_is_invalid() {
        let query = Query::parse("type = runtime_securit").unwrap();

        let err = query.validate(&SecurityEventSchema).unwrap_err();

        assert_eq!(err.to_string(), "invalid value for type: runtime_securit");
    }

    #[test]
    fn test_unknown_field_is_invalid() {
        let query = Query::parse("colour = red").unwrap();

        let err = query.validate(&SecurityEventSchema).unwrap_err();

        assert_eq!(
            err,
            QueryError::UnknownField {
                field: "colour".to_string()
            }
        );
    }

    #[test]
    fn test_non_numeric_severity_is_invalid() {
        let query = Query::parse("severity > high").unwrap();
        assert!(matches!(
            query.validate(&SecurityEventSchema),
            Err(QueryError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_ordering_on_text_field_is_unsupported() {
        let query = Query::parse("host > node").unwrap();
        assert!(matches!(
            query.validate(&SecurityEventSchema),
            Err(QueryError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_custom_schema_is_honoured() {
        struct HostOnly;
        impl EventSchema for HostOnly {
            fn field_kind(&self, field: &str) -> Option<FieldKind> {
                (field == "host").then_some(FieldKind::Text)
            }
        }

        assert!(Query::parse("host = a").unwrap().validate(&HostOnly).is_ok());
        assert!(Query::parse("type = waf")
            .unwrap()
            .validate(&HostOnly)
            .is_err());
    }
}

// ============================================================================
// Matching
// ============================================================================

mod match_tests {
    use super::*;

    #[test]
    fn test_equality_match() {
        let event = runtime_event(10);

        assert!(Query::parse("type = runtime_security").unwrap().matches(&event));
        assert!(!Query::parse("type = waf").unwrap().matches(&event));
    }

    #[test]
    fn test_numeric_comparisons() {
        let event = runtime_event(70);

        assert!(Query::parse("severity >= 70").unwrap().matches(&event));
        assert!(Query::parse("severity > 50").unwrap().matches(&event));
        assert!(!Query::parse("severity < 70").unwrap().matches(&event));
        assert!(Query::parse("severity != 1").unwrap().matches(&event));
    }

    #[test]
    fn test_boolean_composition_and_precedence() {
        let event = runtime_event(10);

        // AND binds tighter than OR.
        assert!(Query::parse("type = waf AND severity = 99 OR host = node-1")
            .unwrap()
            .matches(&event));
        assert!(!Query::parse("type = waf AND (severity = 99 OR host = node-1)")
            .unwrap()
            .matches(&event));
        assert!(Query::parse("NOT type = waf").unwrap().matches(&event));
    }

    #[test]
    fn test_list_membership() {
        let event = runtime_event(10);

        assert!(Query::parse("mitre_ids = T1059").unwrap().matches(&event));
        assert!(Query::parse("mitre_ids != T9999").unwrap().matches(&event));
        assert!(!Query::parse("mitre_ids = T9999").unwrap().matches(&event));
    }

    #[test]
    fn test_missing_optional_field() {
        let event = runtime_event(10);

        assert!(!Query::parse("dest_ip = 10.0.0.1").unwrap().matches(&event));
        assert!(Query::parse("dest_ip != 10.0.0.1").unwrap().matches(&event));
    }
}
