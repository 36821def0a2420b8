/* Definition loading tests (JSON, YAML and files on disk) */

use native_layout::{
    ControlKind, DefinitionConfig, DefinitionError, DefinitionFormat, DefinitionRegistry,
    FieldKind, FieldType,
};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

const CAMERA_JSON: &str = r#"
{
  "types": [
    { "name": "Boolean", "kind": "alias", "alias": "bool" },
    { "name": "ExposureMode", "kind": "enum", "values": ["off", "auto", "night"] },
    { "name": "Point", "kind": "struct", "fields": [["x", "int32"], ["y", "int32"]] },
    { "name": "Region", "kind": "struct", "fields": [
        { "name": "origin", "type": "Point" },
        { "name": "mode", "type": "ExposureMode" },
        { "name": "next", "type": "Region*" }
    ] },
    { "name": "ExposureConfig", "kind": "query", "fields": [
        { "name": "port", "type": "unsigned int" },
        { "name": "region", "type": "Point" },
        { "name": "mode", "type": "ExposureMode" },
        { "name": "enabled", "type": "Boolean" },
        { "name": "gains", "type": "u8[4]" }
    ] }
  ],
  "indices": { "IndexConfigExposure": 33554446 },
  "queries": [
    { "name": "exposure", "query": "IndexConfigExposure", "type": "ExposureConfig",
      "fields": [
        { "name": "mode", "kind": "enum", "sf-name": "mode" },
        { "name": "x", "kind": "number", "sfName": "region.x" }
      ] },
    { "name": "raw", "query": "0x10", "type": "Point" }
  ]
}
"#;

fn write_file(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn strict_load_stops_at_forward_reference() {
    let mut registry = DefinitionRegistry::new();
    let err = registry
        .load_str(CAMERA_JSON, DefinitionFormat::Json)
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::UnknownType { ref type_name, .. } if type_name == "Region*"
    ));

    /* Types declared before the failure stay registered */
    assert_eq!(registry.prototype("Point").unwrap().size(), 8);
    assert!(registry.prototype("Region").is_none());
}

#[test]
fn query_struct_gets_size_and_version_header() {
    let mut registry = DefinitionRegistry::with_config(DefinitionConfig {
        continue_on_error: true,
    });
    registry
        .load_str(CAMERA_JSON, DefinitionFormat::Json)
        .expect("load with skipped fields");

    let region = registry.prototype("Region").unwrap();
    assert!(region.field("next").is_none());

    let query = registry.query("exposure").unwrap();
    assert_eq!(query.index, 33554446);
    let names: Vec<_> = query
        .prototype
        .fields()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["size", "version", "port", "region", "mode", "enabled", "gains"]
    );
    assert_eq!(query.prototype.field("port").unwrap().offset, 8);
    assert_eq!(
        query.prototype.field("gains").unwrap().kind,
        FieldKind::Array {
            element: FieldType::UInt8,
            len: 4
        }
    );

    let mode = &query.controls[0];
    assert_eq!(mode.kind, ControlKind::Enum);
    assert_eq!(mode.values, vec!["off", "auto", "night"]);
    let x = &query.controls[1];
    assert_eq!(x.path, vec!["region", "x"]);
    assert!(x.values.is_empty());

    assert_eq!(registry.query("raw").unwrap().index, 0x10);
    assert_eq!(registry.enum_value("ExposureMode", "night").unwrap(), 2);
    assert_eq!(registry.enum_name("ExposureMode", 1), Some("auto"));
    assert!(registry.enum_value("ExposureMode", "manual").is_err());
}

#[test]
fn yaml_file_loads_by_extension() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
types:
  - name: Header
    kind: struct
    fields:
      - [flags, uint8]
      - [length, uint32]
  - name: Payload
    kind: union
    fields:
      - { name: word, type: uint32 }
      - { name: bytes, type: "u8[6]" }
  - name: Packet
    kind: struct
    fields:
      - { name: header, type: Header }
      - { name: payload, type: Payload }
      - { name: extra, type: "Header*" }
      - { name: cookie, type: "void*" }
queries:
  - name: packet
    query: "0b11"
    type: Packet
"#;
    let path = write_file(temp_dir.path(), "packet.yaml", content);

    let mut registry = DefinitionRegistry::new();
    registry.load_file(&path).expect("load yaml file");

    let payload = registry.prototype("Payload").unwrap();
    assert!(payload.is_union());
    assert_eq!(payload.size(), 8);

    let packet = registry.prototype("Packet").unwrap();
    assert_eq!(packet.field("payload").unwrap().offset, 8);
    assert!(matches!(
        packet.field("extra").unwrap().kind,
        FieldKind::Pointer { target: Some(_) }
    ));
    assert_eq!(
        packet.field("cookie").unwrap().kind,
        FieldKind::Primitive(FieldType::Pointer)
    );
    assert_eq!(registry.query("packet").unwrap().index, 3);
}

#[test]
fn query_over_non_struct_is_rejected() {
    let mut registry = DefinitionRegistry::new();
    let err = registry
        .load_str(
            r#"{"types": [{"name": "Mode", "kind": "enum", "values": ["a"]}],
                "queries": [{"name": "q", "query": "1", "type": "Mode"}]}"#,
            DefinitionFormat::Json,
        )
        .unwrap_err();
    assert!(matches!(err, DefinitionError::IllegalQueryType { .. }));

    let err = registry
        .load_str(
            r#"{"queries": [{"name": "q", "query": "IndexUnknown", "type": "Mode"}]}"#,
            DefinitionFormat::Json,
        )
        .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidQueryIndex { .. }));
}

#[test]
fn missing_file_reports_path() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = DefinitionRegistry::new();
    let err = registry
        .load_file(temp_dir.path().join("absent.json"))
        .unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
