use json_shape::conversion::Direction;
use json_shape::merged::flatten;
use json_shape::visitor::Walk;
use json_shape::{
    ConfigError, Conversion, Conversions, Data, Dialect, Error, ErrorKey, ObjectField, ObjectType, Record, RefPolicy,
    Registry, SchemaOptions, Settings, Tag, TypeDescriptor,
};
use serde_json::json;

fn person() -> TypeDescriptor {
    TypeDescriptor::object(
        "Person",
        vec![
            ObjectField::new("name", TypeDescriptor::string()),
            ObjectField::new("age", TypeDescriptor::integer()).with_default(0i64),
        ],
    )
}

fn node(reg: &mut Registry) -> TypeDescriptor {
    reg.define(
        "Node",
        TypeDescriptor::object(
            "Node",
            vec![ObjectField::new("children", TypeDescriptor::list(TypeDescriptor::alias("Node")))],
        ),
    )
    .unwrap()
}

fn no_uri() -> SchemaOptions {
    SchemaOptions::default().without_schema()
}

// ------ end-to-end scenarios ------ //

#[test]
fn default_fills_absent_field_and_missing_required_is_reported() {
    let reg = Registry::new();
    let de = reg.deserializer(&person(), &Conversions::new()).unwrap();
    assert_eq!(
        de.decode(&json!({"name": "x"})).unwrap(),
        Data::Record(Record::new("Person").with("name", "x").with("age", Data::Int(0)))
    );
    let err = de.decode(&json!({})).unwrap_err();
    assert!(err.messages.is_empty());
    assert_eq!(err.children.len(), 1);
    assert_eq!(err.children[&ErrorKey::from("name")].messages, vec!["missing field"]);
}

#[test]
fn self_referential_type_gets_one_central_fragment() {
    let mut reg = Registry::new();
    let node = node(&mut reg);
    let schema = reg.deserialization_schema(&node, &SchemaOptions::default()).unwrap();
    assert_eq!(
        schema,
        json!({
            "$schema": "http://json-schema.org/draft/2019-09/schema#",
            "$ref": "#/$defs/Node",
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}},
                    "required": ["children"],
                    "additionalProperties": false,
                }
            }
        })
    );
}

#[test]
fn optional_string_under_openapi_is_nullable() {
    let reg = Registry::with_settings(Settings { dialect: Dialect::OpenApi30, ..Settings::default() });
    let ty = TypeDescriptor::optional(TypeDescriptor::string());
    let schema = reg.deserialization_schema(&ty, &SchemaOptions::default()).unwrap();
    assert_eq!(schema, json!({"type": "string", "nullable": true}));
}

#[test]
fn draft_07_isolates_ref_with_sibling_description() {
    let mut reg = Registry::new();
    let point = reg
        .define(
            "Point",
            TypeDescriptor::object(
                "Point",
                vec![ObjectField::new("x", TypeDescriptor::float()), ObjectField::new("y", TypeDescriptor::float())],
            ),
        )
        .unwrap();
    let line = TypeDescriptor::object(
        "Line",
        vec![
            ObjectField::new("start", point.clone()),
            ObjectField::new("end", point).meta("description", json!("where it stops")),
        ],
    );
    let schema = reg.deserialization_schema(&line, &no_uri().dialect(Dialect::Draft07)).unwrap();
    assert_eq!(schema["properties"]["start"], json!({"$ref": "#/definitions/Point"}));
    assert_eq!(
        schema["properties"]["end"],
        json!({"allOf": [{"$ref": "#/definitions/Point"}], "description": "where it stops"})
    );
    assert_eq!(schema["definitions"]["Point"]["required"], json!(["x", "y"]));
    assert!(schema.get("$defs").is_none());
}

#[test]
fn two_types_named_point_conflict() {
    let reg = Registry::new();
    let a = TypeDescriptor::object("A", vec![ObjectField::new("x", TypeDescriptor::integer())]).with_ref("Point");
    let b = TypeDescriptor::object("B", vec![ObjectField::new("lat", TypeDescriptor::float())]).with_ref("Point");
    let both = TypeDescriptor::object("Pair", vec![ObjectField::new("a", a), ObjectField::new("b", b)]);
    let err = reg.deserialization_schema(&both, &no_uri()).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::ConflictingRef { ref name, .. }) if name == "Point"));
    assert!(reg.deserializer(&both, &Conversions::new()).unwrap_err().is_configuration());
}

#[test]
fn merging_a_string_field_is_a_configuration_error() {
    let reg = Registry::new();
    let ty = TypeDescriptor::object(
        "Labelled",
        vec![ObjectField::new("id", TypeDescriptor::integer()), ObjectField::new("label", TypeDescriptor::string()).merged()],
    );
    let expected = Error::Config(ConfigError::MergedNotObject { owner: "Labelled".into(), field: "label".into() });
    assert_eq!(reg.deserialization_schema(&ty, &no_uri()).unwrap_err(), expected);
    assert_eq!(reg.deserializer(&ty, &Conversions::new()).unwrap_err(), expected);
    assert_eq!(reg.serializer(&ty, &Conversions::new()).unwrap_err(), expected);
}

// ------ properties ------ //

#[test]
fn decoding_does_not_short_circuit() {
    let reg = Registry::new();
    let ty = TypeDescriptor::object(
        "AB",
        vec![ObjectField::new("a", TypeDescriptor::integer()), ObjectField::new("b", TypeDescriptor::boolean())],
    );
    let de = reg.deserializer(&ty, &Conversions::new()).unwrap();
    let err = de.decode(&json!({"a": "one", "b": "yes"})).unwrap_err();
    let located: Vec<(String, String)> =
        err.flat().into_iter().map(|e| (e.loc[0].to_string(), e.msg)).collect();
    assert_eq!(
        located,
        vec![
            ("a".to_string(), "expected integer, found string".to_string()),
            ("b".to_string(), "expected boolean, found string".to_string()),
        ]
    );
}

#[test]
fn flatten_lists_own_aliases_then_merged_ones() {
    let reg = Registry::new();
    let b = TypeDescriptor::object(
        "B",
        vec![ObjectField::new("b1", TypeDescriptor::string()), ObjectField::new("b2", TypeDescriptor::string())],
    );
    let a = ObjectType {
        name: "A".into(),
        fields: vec![
            ObjectField::new("a1", TypeDescriptor::string()),
            ObjectField::new("inner", b).merged(),
            ObjectField::new("a2", TypeDescriptor::string()).alias("A2"),
        ],
    };
    let walk = Walk::new(&reg, Direction::Deserialization, Conversions::new());
    assert_eq!(flatten(&walk, &a).unwrap(), ["a1", "A2", "b1", "b2"]);
}

#[test]
fn errors_flatten_with_wire_aliases() {
    let reg = Registry::new();
    let ty = TypeDescriptor::object(
        "Item",
        vec![ObjectField::new("unit_price", TypeDescriptor::float()).alias("unitPrice")],
    );
    let de = reg.deserializer(&ty, &Conversions::new()).unwrap();
    let err = de.decode(&json!({"unitPrice": "1"})).unwrap_err();
    let flat = serde_json::to_value(err.flat()).unwrap();
    assert_eq!(flat, json!([{"loc": ["unitPrice"], "msg": "expected number, found string"}]));
    let data = de.decode(&json!({"unitPrice": 1.5})).unwrap();
    assert_eq!(data.as_record().unwrap().get("unit_price"), Some(&Data::Float(1.5)));
}

// ------ conversions ------ //

#[test]
fn conversion_changes_wire_shape_in_both_directions() {
    let mut reg = Registry::new();
    let rgb = TypeDescriptor::object(
        "Rgb",
        vec![
            ObjectField::new("r", TypeDescriptor::integer()),
            ObjectField::new("g", TypeDescriptor::integer()),
            ObjectField::new("b", TypeDescriptor::integer()),
        ],
    );
    let color = reg.define("Color", rgb).unwrap();
    let hex = TypeDescriptor::string().annotated(vec![Tag::Constraint(json_shape::Constraint::Pattern(
        "^#[0-9a-f]{6}$".into(),
    ))]);
    reg.register(Conversion::deserialization("color_from_hex", color.clone(), hex.clone(), |d| {
        let Data::Str(s) = d else { return Err("not a string".into()) };
        let channel = |i: usize| i64::from_str_radix(&s[i..i + 2], 16).map(Data::Int).map_err(|e| e.to_string());
        Ok(Data::Record(Record::new("Rgb").with("r", channel(1)?).with("g", channel(3)?).with("b", channel(5)?)))
    }))
    .unwrap();
    reg.register(Conversion::serialization("color_to_hex", color.clone(), TypeDescriptor::string(), |d| {
        let Data::Record(r) = d else { return Err("not a record".into()) };
        let mut out = String::from("#");
        for c in ["r", "g", "b"] {
            match r.get(c) {
                Some(Data::Int(v)) => out.push_str(&format!("{v:02x}")),
                _ => return Err(format!("channel {c} missing")),
            }
        }
        Ok(Data::Str(out))
    }))
    .unwrap();

    let schema = reg.deserialization_schema(&color, &no_uri()).unwrap();
    assert_eq!(schema, json!({"type": "string", "pattern": "^#[0-9a-f]{6}$"}));

    let de = reg.deserializer(&color, &Conversions::new()).unwrap();
    let data = de.decode(&json!("#ff8000")).unwrap();
    assert_eq!(data, Data::Record(Record::new("Rgb").with("r", Data::Int(255)).with("g", Data::Int(128)).with("b", Data::Int(0))));
    assert_eq!(de.decode(&json!("orange")).unwrap_err().messages, vec!["unmatched pattern '^#[0-9a-f]{6}$'"]);

    let ser = reg.serializer(&color, &Conversions::new()).unwrap();
    assert_eq!(ser.encode(&data).unwrap(), json!("#ff8000"));

    // the call context overrides the registered conversion
    let raw = Conversions::new()
        .with(Conversion::deserialization("color_as_object", color.clone(), TypeDescriptor::object("Rgb", vec![
            ObjectField::new("r", TypeDescriptor::integer()),
            ObjectField::new("g", TypeDescriptor::integer()),
            ObjectField::new("b", TypeDescriptor::integer()),
        ]), Ok))
        .unwrap();
    let de = reg.deserializer(&color, &raw).unwrap();
    assert!(de.decode(&json!({"r": 1, "g": 2, "b": 3})).is_ok());
}

#[test]
fn sub_conversions_apply_only_below_their_conversion() {
    let mut reg = Registry::new();
    let celsius = reg.define_anonymous("Celsius", TypeDescriptor::float()).unwrap();
    let reading = reg
        .define("Reading", TypeDescriptor::object("Reading", vec![ObjectField::new("temp", celsius.clone())]))
        .unwrap();
    let fahrenheit = Conversion::serialization("to_fahrenheit", celsius, TypeDescriptor::float(), |d| match d {
        Data::Float(c) => Ok(Data::Float(c * 9.0 / 5.0 + 32.0)),
        other => Err(format!("unexpected {}", other.kind())),
    });
    let report = reg.define_anonymous("Report", TypeDescriptor::list(reading.clone())).unwrap();
    reg.register(
        Conversion::serialization("imperial", report.clone(), TypeDescriptor::list(reading.clone()), Ok)
            .with_sub_conversions(Conversions::new().with(fahrenheit).unwrap()),
    )
    .unwrap();

    let reading_value = Data::Record(Record::new("Reading").with("temp", Data::Float(100.0)));
    let plain = reg.serializer(&reading, &Conversions::new()).unwrap();
    assert_eq!(plain.encode(&reading_value).unwrap(), json!({"temp": 100.0}));
    let imperial = reg.serializer(&report, &Conversions::new()).unwrap();
    assert_eq!(imperial.encode(&Data::List(vec![reading_value])).unwrap(), json!([{"temp": 212.0}]));
}

// ------ references and dialects ------ //

#[test]
fn ref_policy_always_names_single_use_types() {
    let mut reg = Registry::new();
    let tag = reg.define("Tag", TypeDescriptor::string()).unwrap();
    let post = TypeDescriptor::object("Post", vec![ObjectField::new("tag", tag)]);
    let repeated = reg.deserialization_schema(&post, &no_uri()).unwrap();
    assert_eq!(repeated["properties"]["tag"], json!({"type": "string"}));
    let always = reg.deserialization_schema(&post, &no_uri().ref_policy(RefPolicy::Always)).unwrap();
    assert_eq!(always["properties"]["tag"], json!({"$ref": "#/$defs/Tag"}));
    assert_eq!(always["$defs"]["Tag"], json!({"type": "string"}));
}

#[test]
fn openapi_components_come_from_definitions_schema() {
    let mut reg = Registry::with_settings(Settings { dialect: Dialect::OpenApi30, ..Settings::default() });
    let node = node(&mut reg);
    let maybe = reg
        .define("MaybeNode", TypeDescriptor::optional(node.clone()))
        .unwrap();
    let doc = reg.deserialization_schema(&maybe, &SchemaOptions::default()).unwrap();
    assert_eq!(doc, json!({"$ref": "#/components/schema/MaybeNode"}));
    let components = reg.definitions_schema(&[maybe], &[node], &SchemaOptions::default()).unwrap();
    assert_eq!(components.keys().collect::<Vec<_>>(), ["MaybeNode", "Node"]);
    assert_eq!(
        components["MaybeNode"],
        json!({"nullable": true, "allOf": [{"$ref": "#/components/schema/Node"}]})
    );
    assert_eq!(
        components["Node"]["properties"]["children"]["items"],
        json!({"$ref": "#/components/schema/Node"})
    );
}

#[test]
fn directions_disagreeing_on_a_reference_conflict() {
    let mut reg = Registry::new();
    let id = reg.define("Id", TypeDescriptor::integer()).unwrap();
    reg.register(Conversion::serialization("id_to_str", id.clone(), TypeDescriptor::string(), |d| {
        Ok(Data::Str(format!("{d:?}")))
    }))
    .unwrap();
    let err = reg
        .definitions_schema(&[id.clone()], &[id], &SchemaOptions::default().ref_policy(RefPolicy::Always))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn unbroken_alias_cycle_is_recursive() {
    let mut reg = Registry::new();
    let chain = reg
        .define_anonymous("Chain", TypeDescriptor::optional(TypeDescriptor::alias("Chain")))
        .unwrap();
    assert_eq!(reg.deserialization_schema(&chain, &no_uri()).unwrap_err(), Error::Recursive { name: "Chain".into() });
    assert!(matches!(reg.deserializer(&chain, &Conversions::new()), Err(Error::Recursive { .. })));
}

#[test]
fn generation_is_cached_until_reset() {
    let mut reg = Registry::new();
    let node = node(&mut reg);
    let first = reg.deserialization_schema(&node, &no_uri()).unwrap();
    reg.deserializer(&node, &Conversions::new()).unwrap();
    assert_eq!(reg.cached(), 2);
    assert_eq!(reg.deserialization_schema(&node, &no_uri()).unwrap(), first);
    assert_eq!(reg.cached(), 2);
    reg.reset_cache();
    assert_eq!(reg.cached(), 0);
    reg.reset();
    assert!(reg.alias("Node").is_err());
}

#[test]
fn additional_properties_setting_relaxes_objects() {
    let reg = Registry::with_settings(Settings { additional_properties: true, ..Settings::default() });
    let schema = reg.deserialization_schema(&person(), &no_uri()).unwrap();
    assert_eq!(schema["additionalProperties"], json!(true));
    let de = reg.deserializer(&person(), &Conversions::new()).unwrap();
    assert!(de.decode(&json!({"name": "x", "nickname": "y"})).is_ok());
}

#[test]
fn call_contexts_sharing_a_conversion_name_are_cached_apart() {
    let mut reg = Registry::new();
    let ts = reg.define_anonymous("Ts", TypeDescriptor::integer()).unwrap();
    let as_text = Conversions::new()
        .with(Conversion::serialization("override", ts.clone(), TypeDescriptor::string(), |d| match d {
            Data::Int(i) => Ok(Data::Str(i.to_string())),
            other => Err(format!("unexpected {}", other.kind())),
        }))
        .unwrap();
    let as_flag = Conversions::new()
        .with(Conversion::serialization("override", ts.clone(), TypeDescriptor::boolean(), |d| match d {
            Data::Int(i) => Ok(Data::Bool(i != 0)),
            other => Err(format!("unexpected {}", other.kind())),
        }))
        .unwrap();

    let text = reg.serialization_schema(&ts, &no_uri().conversions(as_text.clone())).unwrap();
    let flag = reg.serialization_schema(&ts, &no_uri().conversions(as_flag.clone())).unwrap();
    assert_eq!(text, json!({"type": "string"}));
    assert_eq!(flag, json!({"type": "boolean"}));
    assert_eq!(reg.serializer(&ts, &as_text).unwrap().encode(&Data::Int(5)).unwrap(), json!("5"));
    assert_eq!(reg.serializer(&ts, &as_flag).unwrap().encode(&Data::Int(5)).unwrap(), json!(true));
}

#[test]
fn same_named_conversions_keep_their_own_sub_conversions() {
    let mut reg = Registry::new();
    let celsius = reg.define_anonymous("Celsius", TypeDescriptor::float()).unwrap();
    let reading = reg
        .define("Reading", TypeDescriptor::object("Reading", vec![ObjectField::new("temp", celsius.clone())]))
        .unwrap();
    let unit = |scale: f64, offset: f64| {
        let to = Conversion::serialization("unit", celsius.clone(), TypeDescriptor::float(), move |d| match d {
            Data::Float(c) => Ok(Data::Float(c * scale + offset)),
            other => Err(format!("unexpected {}", other.kind())),
        });
        Conversions::new().with(to).unwrap()
    };
    let imperial = reg.define_anonymous("Imperial", TypeDescriptor::list(reading.clone())).unwrap();
    let kelvin = reg.define_anonymous("Kelvin", TypeDescriptor::list(reading.clone())).unwrap();
    for (report, sub) in [(imperial.clone(), unit(1.8, 32.0)), (kelvin.clone(), unit(1.0, 273.0))] {
        reg.register(
            Conversion::serialization("report", report, TypeDescriptor::list(reading.clone()), Ok).with_sub_conversions(sub),
        )
        .unwrap();
    }

    let both = TypeDescriptor::Tuple(vec![imperial, kelvin]);
    let ser = reg.serializer(&both, &Conversions::new()).unwrap();
    let readings = Data::List(vec![Data::Record(Record::new("Reading").with("temp", Data::Float(100.0)))]);
    assert_eq!(
        ser.encode(&Data::List(vec![readings.clone(), readings])).unwrap(),
        json!([[{"temp": 212.0}], [{"temp": 373.0}]])
    );
}

#[test]
fn nested_conversions_sharing_a_name_are_not_recursive() {
    let mut reg = Registry::new();
    let inner = reg.define_anonymous("Inner", TypeDescriptor::integer()).unwrap();
    let outer = reg.define_anonymous("Outer", TypeDescriptor::list(TypeDescriptor::integer())).unwrap();
    reg.register(Conversion::serialization("wrap", outer.clone(), TypeDescriptor::list(inner.clone()), Ok)).unwrap();
    reg.register(Conversion::serialization("wrap", inner, TypeDescriptor::string(), |d| match d {
        Data::Int(i) => Ok(Data::Str(i.to_string())),
        other => Err(format!("unexpected {}", other.kind())),
    }))
    .unwrap();
    let ser = reg.serializer(&outer, &Conversions::new()).unwrap();
    assert_eq!(ser.encode(&Data::List(vec![Data::Int(1), Data::Int(2)])).unwrap(), json!(["1", "2"]));
    assert_eq!(
        reg.serialization_schema(&outer, &no_uri()).unwrap(),
        json!({"type": "array", "items": {"type": "string"}})
    );
}

#[test]
fn named_type_reached_through_a_transparent_alias_is_not_recursive() {
    let mut reg = Registry::new();
    let forest = reg.define_anonymous("Forest", TypeDescriptor::list(TypeDescriptor::alias("Tree"))).unwrap();
    reg.define("Tree", TypeDescriptor::object("Tree", vec![ObjectField::new("children", forest.clone())])).unwrap();

    let schema = reg.deserialization_schema(&forest, &no_uri()).unwrap();
    assert_eq!(
        schema,
        json!({
            "type": "array",
            "items": {"$ref": "#/$defs/Tree"},
            "$defs": {
                "Tree": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/$defs/Tree"}}},
                    "required": ["children"],
                    "additionalProperties": false,
                }
            }
        })
    );
    let de = reg.deserializer(&forest, &Conversions::new()).unwrap();
    let leaf = Data::Record(Record::new("Tree").with("children", Data::List(vec![])));
    assert_eq!(
        de.decode(&json!([{"children": [{"children": []}]}])).unwrap(),
        Data::List(vec![Data::Record(Record::new("Tree").with("children", Data::List(vec![leaf.clone()])))])
    );
    let ser = reg.serializer(&forest, &Conversions::new()).unwrap();
    assert_eq!(ser.encode(&Data::List(vec![leaf])).unwrap(), json!([{"children": []}]));
}

// ------ caching ------ //

#[test]
fn concurrent_generation_agrees_and_caches_each_key_once() {
    let mut reg = Registry::new();
    let node = node(&mut reg);
    let reg = reg;
    let roots = [node, person()];
    let input = [json!({"children": [{"children": []}]}), json!({"name": "x"})];

    let results: Vec<Vec<(serde_json::Value, serde_json::Value)>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    roots
                        .iter()
                        .zip(&input)
                        .map(|(root, wire)| {
                            let schema = reg.deserialization_schema(root, &no_uri()).unwrap();
                            let decoded = reg.deserializer(root, &Conversions::new()).unwrap().decode(wire).unwrap();
                            (schema, serde_json::to_value(decoded).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(reg.cached(), roots.len() * 2);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = TypeDescriptor> {
        prop_oneof![
            Just(TypeDescriptor::string()),
            Just(TypeDescriptor::integer()),
            Just(TypeDescriptor::float()),
            Just(TypeDescriptor::boolean()),
            "[a-z]{1,6}".prop_map(|f| TypeDescriptor::object("O", vec![ObjectField::new(f, TypeDescriptor::string())])),
        ]
    }

    fn descriptor() -> impl Strategy<Value = TypeDescriptor> {
        leaf().prop_recursive(3, 12, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(TypeDescriptor::list),
                prop::collection::vec(inner.clone(), 1..3).prop_map(TypeDescriptor::Tuple),
                (inner.clone(), inner).prop_map(|(k, v)| TypeDescriptor::Union(vec![k, v])),
            ]
        })
    }

    proptest! {
        #[test]
        fn same_reference_name_for_distinct_types_conflicts(a in descriptor(), b in descriptor()) {
            prop_assume!(a != b);
            let reg = Registry::new();
            let pair = TypeDescriptor::Tuple(vec![a.with_ref("Point"), b.with_ref("Point")]);
            let err = reg.deserialization_schema(&pair, &no_uri()).unwrap_err();
            prop_assert!(
                matches!(err, Error::Config(ConfigError::ConflictingRef { .. })),
                "unexpected error {:?}",
                err
            );
        }
    }
}
