//! End-to-end merge pipeline tests, fully offline: subscription
//! documents are parsed and annotated the way the fetcher does before
//! going through dedup, renaming and template injection.

use std::collections::HashSet;
use submerge::merge::merge_into_template;
use submerge::subscription::parse_and_annotate;

const SUB_A: &str = r#"
proxies:
  - name: tokyo
    type: ss
    server: jp.example.com
    port: 443
    cipher: aes-256-gcm
    password: a
  - name: osaka
    type: vmess
    server: jp2.example.com
    port: 8443
    uuid: 019a932f-3a5e-7ba2-9392-b6a87ad3a5c4
"#;

const SUB_B: &str = r#"
proxies:
  - name: tokyo premium
    type: ss
    server: jp.example.com
    port: 443
    cipher: aes-256-gcm
    password: b
  - name: frankfurt
    type: trojan
    server: de.example.com
    port: 443
    password: c
"#;

const TEMPLATE: &str = r#"
mixed-port: 7890
mode: rule
log-level: info
proxies: []
rules:
  - MATCH,DIRECT
"#;

#[test]
fn merged_document_holds_every_invariant() {
    let mut proxies = parse_and_annotate(SUB_A, "alpha");
    proxies.extend(parse_and_annotate(SUB_B, "beta"));
    assert_eq!(proxies.len(), 4);

    let merged = merge_into_template(TEMPLATE, proxies).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&merged).unwrap();

    // Template keys pass through untouched
    assert_eq!(doc["mixed-port"].as_u64(), Some(7890));
    assert_eq!(doc["mode"].as_str(), Some("rule"));
    assert_eq!(doc["rules"].as_sequence().unwrap().len(), 1);

    // tokyo and "tokyo premium" share (ss, jp.example.com, 443):
    // one entry survives, holding the last-seen value
    let out = doc["proxies"].as_sequence().unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[0]["name"].as_str(), Some("tokyo premium [beta]"));
    assert_eq!(out[0]["password"].as_str(), Some("b"));

    // No duplicate identity keys, no duplicate names
    let keys: HashSet<_> = out
        .iter()
        .map(|p| {
            (
                p["type"].as_str().unwrap().to_string(),
                p["server"].as_str().unwrap().to_string(),
                p["port"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(keys.len(), out.len());

    let names: HashSet<_> = out.iter().map(|p| p["name"].as_str().unwrap()).collect();
    assert_eq!(names.len(), out.len());
}

#[test]
fn local_file_source_merges_after_remotes() {
    let mut proxies = parse_and_annotate(SUB_A, "alpha");
    proxies.extend(parse_and_annotate(SUB_A, "file"));

    // Same identity keys: the [file] copies win every slot
    let merged = merge_into_template(TEMPLATE, proxies).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&merged).unwrap();
    let out = doc["proxies"].as_sequence().unwrap();

    assert_eq!(out.len(), 2);
    for proxy in out {
        assert!(proxy["name"].as_str().unwrap().ends_with("[file]"));
    }
}

#[test]
fn failed_source_still_leaves_others_standing() {
    let mut proxies = parse_and_annotate(": not [ yaml", "alpha");
    assert!(proxies.is_empty());
    proxies.extend(parse_and_annotate(SUB_B, "beta"));

    let merged = merge_into_template(TEMPLATE, proxies).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&merged).unwrap();
    assert_eq!(doc["proxies"].as_sequence().unwrap().len(), 2);
}

#[test]
fn collision_example_from_field_reports() {
    // Two proxies, same (ss, a, 1) key, different names: last value
    // wins and keeps its own annotated name
    let source = r#"
proxies:
  - {name: X, type: ss, server: a, port: 1, cipher: c, password: p}
  - {name: Y, type: ss, server: a, port: 1, cipher: c, password: p}
"#;
    let proxies = parse_and_annotate(source, "src");
    let merged = merge_into_template("mode: rule\n", proxies).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&merged).unwrap();

    let out = doc["proxies"].as_sequence().unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["name"].as_str(), Some("Y [src]"));
}
