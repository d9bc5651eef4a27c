use assetdig_core::db::{Amounts, TrimStats};
use assetdig_core::wire::align4;
use assetdig_core::{
    trim, ContainerParser, DatabaseConfig, DatabaseDecoder, DecodeOptions, Error, PathFilter,
    Schema, TableMatches, TypeDecoder, Value,
};
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::collections::HashMap;

const BLOCK_SCHEMA: &str = include_str!("../../../schemas/Block.cs");
const RESOURCE_SCHEMA: &str = include_str!("../../../schemas/ResourceItem.cs");
const MARKER: &str = "oneAdjacentNeighbor";

fn schemas() -> (Schema, Schema) {
    let mut builder = DatabaseConfig::new().schema_builder();
    let blocks = builder.build(BLOCK_SCHEMA).unwrap();
    let resources = builder.build(RESOURCE_SCHEMA).unwrap();
    (blocks, resources)
}

fn put(out: &mut Vec<u8>, decoder: &TypeDecoder, value: &Value) {
    match (decoder, value) {
        (TypeDecoder::Int32, Value::Int(v)) => out.extend(v.to_le_bytes()),
        (TypeDecoder::Float32, Value::Float(v)) => out.extend(v.to_le_bytes()),
        (TypeDecoder::Bool, Value::Bool(v)) => out.extend(i32::from(*v).to_le_bytes()),
        (TypeDecoder::String, Value::Str(s)) => {
            out.extend((s.len() as u32).to_le_bytes());
            out.extend(s.as_bytes());
            out.resize(out.len() + align4(s.len()) - s.len(), 0);
        }
        (TypeDecoder::AssetRef, Value::AssetRef(words)) => {
            words.iter().for_each(|w| out.extend(w.to_le_bytes()))
        }
        (TypeDecoder::GameObject, Value::GameObject(words)) => {
            words.iter().for_each(|w| out.extend(w.to_le_bytes()))
        }
        (TypeDecoder::Vector3, Value::Vector3(v)) => {
            v.iter().for_each(|c| out.extend(c.to_le_bytes()))
        }
        (TypeDecoder::Enum(table), Value::Str(member)) => {
            let index = table.members().iter().position(|m| m == member).unwrap();
            out.extend((index as i32).to_le_bytes());
        }
        (TypeDecoder::List(inner), Value::List(items)) => {
            out.extend((items.len() as i32).to_le_bytes());
            items.iter().for_each(|item| put(out, inner, item));
        }
        (decoder, value) => panic!("cannot encode {value:?} as {decoder:?}"),
    }
}

fn default_value(decoder: &TypeDecoder) -> Value {
    match decoder {
        TypeDecoder::Int32 => Value::Int(0),
        TypeDecoder::Float32 => Value::Float(0.0),
        TypeDecoder::Bool => Value::Bool(false),
        TypeDecoder::String => Value::Str(String::new()),
        TypeDecoder::AssetRef => Value::AssetRef([0; 3]),
        TypeDecoder::GameObject => Value::GameObject([0; 5]),
        TypeDecoder::Vector3 => Value::Vector3([0.0; 3]),
        TypeDecoder::Enum(table) => Value::Str(table.members()[0].clone()),
        TypeDecoder::List(_) => Value::List(Vec::new()),
    }
}

/// Encode the declared fields `first..=last` in order
fn section(out: &mut Vec<u8>, schema: &Schema, first: &str, last: &str, values: &HashMap<String, Value>) {
    for field in &schema.fields()[schema.range(first, last).unwrap()] {
        let value = values
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| default_value(&field.decoder));
        put(out, &field.decoder, &value);
    }
}

fn resource_table(schema: &Schema, aliases: &[&str]) -> Vec<u8> {
    let mut out = vec![0; 248];
    for (i, alias) in aliases.iter().enumerate() {
        let values = HashMap::from([
            ("alias".to_string(), Value::Str(alias.to_string())),
            ("myName".to_string(), Value::Str(format!("R {alias}"))),
            ("cost".to_string(), Value::Float(i as f32 + 0.5)),
            ("category".to_string(), Value::Str("FOOD".into())),
        ]);
        section(&mut out, schema, "icon", "myUnits", &values);
    }
    out
}

struct BlockFixture<'a> {
    header: &'a str,
    description: &'a str,
    name: &'a str,
    category: &'a str,
    inputs: &'a [(i32, f32)],
    outputs: &'a [(i32, f32)],
    upper_forward: bool,
    agent_count: u32,
}

impl Default for BlockFixture<'_> {
    fn default() -> Self {
        Self {
            header: "FARM",
            description: "Grows wheat in neat rows.",
            name: "B Farm",
            category: "PRODUCTION",
            inputs: &[],
            outputs: &[],
            upper_forward: false,
            agent_count: 2,
        }
    }
}

fn indices(pairs: &[(i32, f32)]) -> Value {
    Value::List(pairs.iter().map(|(i, _)| Value::Int(*i)).collect())
}

fn amounts(pairs: &[(i32, f32)]) -> Value {
    Value::List(pairs.iter().map(|(_, a)| Value::Float(*a)).collect())
}

/// Lay out one block record the way the game serializes it
fn block(out: &mut Vec<u8>, schema: &Schema, fixture: &BlockFixture<'_>) {
    let mut values: HashMap<String, Value> = HashMap::from([
        ("myManager".to_string(), Value::AssetRef([1, 0, 0])),
        ("toolTipHeader".to_string(), Value::Str(fixture.header.into())),
        ("toolTipContent".to_string(), Value::Str(fixture.description.into())),
        ("myName".to_string(), Value::Str(fixture.name.into())),
        ("category".to_string(), Value::Str(fixture.category.into())),
        ("connectUpperForward".to_string(), Value::Bool(fixture.upper_forward)),
        ("distanceToStreet".to_string(), Value::Int(3)),
        ("inputs".to_string(), indices(fixture.inputs)),
        ("inputsAmounts".to_string(), amounts(fixture.inputs)),
        ("outputs".to_string(), indices(fixture.outputs)),
        ("outputsAmounts".to_string(), amounts(fixture.outputs)),
        (
            "allAgentFunctionsString".to_string(),
            Value::List(vec![Value::Str(MARKER.into()), Value::Str("twoNeighbors".into())]),
        ),
        ("maxDecay".to_string(), Value::Int(5)),
    ]);
    // Localized strings between the manager and blockToCopy
    let localized = schema.range("myManager", "blockToCopy").unwrap();
    for (i, field) in schema.fields()[localized.start + 1..localized.end - 1].iter().enumerate() {
        values.insert(field.name.clone(), Value::Str(format!("s{i:02}")));
    }

    section(out, schema, "altTexture1", "toolTipContent", &values);
    out.extend([0; 8]);
    section(out, schema, "distanceToStreet", "distanceToStreet", &values);
    out.extend([0; 4]);
    section(out, schema, "inputs", "optionalInputsAmounts", &values);
    out.extend([0; 16]);
    if fixture.agent_count == 2 {
        section(out, schema, "allAgentFunctionsString", "needsAccessToProduce", &values);
    } else {
        out.extend(fixture.agent_count.to_le_bytes());
        put(out, &TypeDecoder::String, &Value::Str(MARKER.into()));
    }
    out.extend([0; 32]);
}

fn block_table(schema: &Schema) -> Vec<u8> {
    // The table header mentions the marker once before the first record
    let mut out = MARKER.as_bytes().to_vec();
    out.resize(300, 0);

    let fixtures = [
        BlockFixture {
            inputs: &[(1, 2.0)],
            outputs: &[(2, 0.5)],
            ..Default::default()
        },
        BlockFixture {
            header: "CANAL BRIDGE",
            description: "",
            name: "B Canal Bridge",
            category: "PUBLIC_SPACE",
            ..Default::default()
        },
        BlockFixture {
            header: "MILL",
            description: "Turns wheat into flour.",
            name: "B Mill",
            category: "PRODUCTION",
            inputs: &[(2, 1.0)],
            outputs: &[(3, 0.1)],
            upper_forward: true,
            ..Default::default()
        },
        BlockFixture {
            header: "WETLAND",
            description: "A marsh full of life.",
            name: "T Old Cactus",
            category: "ORGANIC",
            ..Default::default()
        },
        BlockFixture {
            header: "BIG FARM",
            description: "Grows even more wheat.",
            name: "B Big Farm",
            inputs: &[(1, 2.0)],
            outputs: &[(2, 0.5)],
            ..Default::default()
        },
        BlockFixture {
            header: "GHOST",
            description: "Needs a resource nobody has.",
            name: "B Ghost",
            inputs: &[(9, 1.0)],
            ..Default::default()
        },
        BlockFixture {
            header: "BROKEN",
            description: "Agent list is garbage here.",
            name: "B Broken",
            agent_count: 25,
            ..Default::default()
        },
    ];
    for fixture in &fixtures {
        block(&mut out, schema, fixture);
    }
    out
}

struct Object {
    path_id: u64,
    class_index: u32,
    body: Vec<u8>,
}

fn behaviour(path_id: u64, name: &str, enabled: bool, payload: &[u8]) -> Object {
    let mut body = Vec::new();
    body.extend(0u32.to_le_bytes());
    body.extend(1u64.to_le_bytes());
    body.push(u8::from(enabled));
    body.resize(align4(body.len()), 0);
    body.extend(1u32.to_le_bytes());
    body.extend(500u64.to_le_bytes());
    body.extend((name.len() as u32).to_le_bytes());
    body.extend(name.as_bytes());
    body.resize(align4(body.len()), 0);
    body.extend(payload);
    Object {
        path_id,
        class_index: 0,
        body,
    }
}

/// A container with a behaviour class (index 0) and a texture class (index 1)
fn container(objects: &[Object]) -> Vec<u8> {
    let mut dir = Vec::new();
    dir.extend(b"5.6.2f1\0");
    dir.extend(19u32.to_le_bytes());
    dir.push(0);
    dir.extend(2u32.to_le_bytes());
    for (class_id, hint) in [(114u32, 0i16), (28, -1)] {
        dir.extend(class_id.to_le_bytes());
        dir.push(0);
        dir.extend(hint.to_le_bytes());
        let extra = if class_id == 114 { 32 } else { 16 };
        dir.resize(dir.len() + extra, 0xAA);
    }

    let mut offsets = Vec::new();
    let mut data_len = 0;
    for object in objects {
        offsets.push(data_len);
        data_len = (data_len + object.body.len() + 7) & !7;
    }

    dir.extend((objects.len() as u32).to_le_bytes());
    for (object, offset) in objects.iter().zip(&offsets) {
        // Alignment is relative to the file, which starts with a 20 byte header
        dir.resize(align4(dir.len() + 20) - 20, 0);
        dir.extend(object.path_id.to_le_bytes());
        dir.extend((*offset as u32).to_le_bytes());
        dir.extend((object.body.len() as u32).to_le_bytes());
        dir.extend(object.class_index.to_le_bytes());
    }
    dir.extend(0u32.to_le_bytes());
    dir.extend(2u32.to_le_bytes());
    for (archive, file) in [("", "globalgamemanagers.assets"), ("", "resources.assets")] {
        dir.extend(archive.as_bytes());
        dir.push(0);
        dir.resize(dir.len() + 20, 0);
        dir.extend(file.as_bytes());
        dir.push(0);
    }

    let data_offset = (20 + dir.len() + 15) & !15;
    let mut out = Vec::new();
    for word in [dir.len() as u32, (data_offset + data_len) as u32, 17, data_offset as u32] {
        out.extend(word.to_be_bytes());
    }
    out.extend([0; 4]);
    out.extend(dir);
    out.resize(data_offset, 0);
    for (object, offset) in objects.iter().zip(&offsets) {
        out.resize(data_offset + offset, 0);
        out.extend(&object.body);
    }
    out
}

fn game_container() -> Vec<u8> {
    let (block_schema, resource_schema) = schemas();
    container(&[
        behaviour(21222, "blockDB_current", true, &block_table(&block_schema)),
        behaviour(21225, "resourceDB", true, &resource_table(&resource_schema, &["Water", "Wheat", "Flour"])),
        behaviour(21230, "audioDB", true, b"\x01\x02\x03\x04"),
        behaviour(21231, "disabledDB", false, b""),
        Object {
            path_id: 7,
            class_index: 1,
            body: vec![0xEE; 12],
        },
    ])
}

#[test]
fn test_container_entries() {
    let data = Bytes::from(game_container());
    let container = ContainerParser::new().parse(&data, &PathFilter::All).unwrap();

    assert_eq!(container.assets.len(), 5);
    assert_eq!(container.classes[0].type_hint, -1);
    assert_eq!(container.classes[1].type_hint, 28);
    assert_eq!(container.shared_assets[1].file_name, "resources.assets");

    let names: Vec<_> = container.behaviours().map(|(id, b)| (id, b.name.as_str())).collect();
    assert_eq!(
        names,
        vec![(21222, "blockDB_current"), (21225, "resourceDB"), (21230, "audioDB")]
    );
    assert!(container.assets[&21231].behaviour.is_none());
    assert!(container.assets[&7].behaviour.is_none());

    let audio = container.behaviour_named("audioDB").unwrap();
    assert_eq!(&audio.payload[..], b"\x01\x02\x03\x04");
    assert_eq!(audio.owner.path_id, 1);
    assert_eq!(audio.owner.shared.as_ref().unwrap().file_name, "globalgamemanagers.assets");
    assert_eq!(audio.script.path_id, 500);
    assert_eq!(audio.script.shared.as_ref().unwrap().file_name, "resources.assets");
}

#[test]
fn test_path_filter_limits_entries() {
    let data = Bytes::from(game_container());
    let container = ContainerParser::new()
        .parse(&data, &DatabaseConfig::new().path_filter())
        .unwrap();
    let ids: Vec<_> = container.assets.keys().copied().collect();
    assert_eq!(ids, vec![21222, 21225]);
}

#[test]
fn test_parse_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sharedassets0.assets");
    std::fs::write(&path, game_container()).unwrap();

    let container = ContainerParser::new().parse_file(&path, &PathFilter::All).unwrap();
    assert_eq!(container.header.version, "5.6.2f1");

    let err = ContainerParser::new()
        .parse_file(dir.path().join("missing.assets"), &PathFilter::All)
        .unwrap_err();
    assert!(matches!(err, Error::FileRead { .. }));
}

#[test]
fn test_truncated_container_is_error() {
    let mut data = game_container();
    data.truncate(40);
    let err = ContainerParser::new()
        .parse(&Bytes::from(data), &PathFilter::All)
        .unwrap_err();
    assert!(err.is_eof());
}

fn unpack() -> assetdig_core::Database {
    let config = DatabaseConfig::new();
    let data = Bytes::from(game_container());
    let container = ContainerParser::new().parse(&data, &config.path_filter()).unwrap();

    let mut matches = TableMatches::new();
    matches.collect(&container, &config);
    assert!(matches.is_complete());
    let (blocks, resources) = matches.into_tables(&config).unwrap();

    let (block_schema, resource_schema) = schemas();
    DatabaseDecoder::new(&block_schema, &resource_schema, config)
        .with_options(DecodeOptions::new().diagnostics(true))
        .unpack(&blocks, &resources)
        .unwrap()
}

#[test]
fn test_resources_sorted_by_alias() {
    let database = unpack();
    let aliases: Vec<_> = database.resources.iter().map(|r| r.alias()).collect();
    assert_eq!(aliases, vec!["Flour", "Water", "Wheat"]);
    assert_eq!(
        database.resources[1].record().str("myName").unwrap(),
        "R Water"
    );
}

#[test]
fn test_blocks_decoded_and_resolved() {
    let database = unpack();

    let headers: Vec<_> = database.blocks.iter().map(|b| b.header()).collect();
    assert_eq!(headers, vec!["BIG FARM", "CANAL BRIDGE", "FARM", "MILL"]);
    assert_eq!(database.skipped.len(), 1);
    assert_eq!(database.unresolved, 1);
    assert_eq!(database.coverage.len(), 6);

    let mill = &database.blocks[3];
    assert_eq!(mill.name(), "B Mill");
    assert_eq!(mill.category(), "PRODUCTION");
    assert_eq!(mill.connect_upper(), [true, false, false, false]);
    assert_eq!(mill.inputs, Amounts::from([("Wheat".to_string(), 1.0)]));
    assert_eq!(mill.outputs, Amounts::from([("Flour".to_string(), 0.1)]));
    assert_eq!(mill.record().int("distanceToStreet").unwrap(), 3);
    assert_eq!(mill.record().int("maxDecay").unwrap(), 5);
    assert_eq!(
        mill.record().str("toolTipContent").unwrap(),
        "Turns wheat into flour."
    );

    let bridge = &database.blocks[1];
    assert_eq!(bridge.record().str("toolTipContent").unwrap(), "");
    assert_eq!(bridge.name(), "B Canal Bridge");
}

#[test]
fn test_trim_after_unpack() {
    let mut database = unpack();
    let stats = trim(&mut database.blocks);
    assert_eq!(
        stats,
        TrimStats {
            unavailable: 1,
            equivalent: 1
        }
    );

    let json = serde_json::to_value(&database).unwrap();
    let headers: Vec<_> = json["blocks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["toolTipHeader"].as_str().unwrap())
        .collect();
    assert_eq!(headers, vec!["BIG FARM", "MILL"]);
    assert_eq!(json["blocks"][0]["inputs"], serde_json::json!({ "Water": 2.0 }));
    assert_eq!(json["resources"][0]["alias"], "Flour");
    assert!(json.get("skipped").is_none());
}
