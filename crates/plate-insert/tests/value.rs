use plate_insert::{
    InsertObjectError, InsertObjectOptions, Node, OptimalPosition, PlateValue, PluginRegistry,
    Position, Selection, SelectionPlacement,
};
use pretty_assertions::assert_eq;

#[test]
fn value_loads_with_defaults_and_round_trips() -> anyhow::Result<()> {
    let value = PlateValue::from_json_value(serde_json::json!({
        "document": {
            "children": [
                {
                    "node": "element",
                    "kind": "paragraph",
                    "attrs": { "align": "center" },
                    "children": [{ "node": "text", "text": "hi" }]
                },
                { "node": "element", "kind": "image", "attrs": { "src": "a.png" } }
            ]
        }
    }))?;

    assert_eq!(value.schema, "plate-insert");
    assert_eq!(value.version, 1);
    assert_eq!(
        value.document.children,
        vec![
            Node::paragraph("hi").with_attr("align", "center"),
            Node::image("a.png", None),
        ]
    );

    let json = value.to_json_pretty()?;
    assert_eq!(PlateValue::from_json_str(&json)?, value);
    Ok(())
}

#[test]
fn editor_built_from_value_starts_in_first_block() {
    let value = PlateValue::from_document(plate_insert::Document::new(vec![Node::paragraph(
        "hi",
    )]));

    let editor = value.into_editor(PluginRegistry::richtext());
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![0], 0))
    );
    assert_eq!(PlateValue::from(&editor).document.children, vec![Node::paragraph("hi")]);
}

#[test]
fn options_deserialize_from_strings() -> anyhow::Result<()> {
    let options: InsertObjectOptions = serde_json::from_value(serde_json::json!({
        "find_optimal_position": "before",
        "set_selection": "on"
    }))?;
    assert_eq!(
        options,
        InsertObjectOptions {
            find_optimal_position: Some(OptimalPosition::Before),
            set_selection: Some(SelectionPlacement::On),
        }
    );

    let empty: InsertObjectOptions = serde_json::from_value(serde_json::json!({}))?;
    assert_eq!(empty, InsertObjectOptions::default());

    assert_eq!(
        serde_json::to_value(InsertObjectOptions::interactive())?,
        serde_json::json!({ "find_optimal_position": "auto", "set_selection": "after" })
    );
    Ok(())
}

#[test]
fn unknown_option_strings_are_rejected() {
    assert_eq!(
        "sideways".parse::<SelectionPlacement>(),
        Err(InsertObjectError::InvalidSelectionPlacement(
            "sideways".to_string()
        ))
    );
    assert_eq!(
        "middle".parse::<OptimalPosition>(),
        Err(InsertObjectError::InvalidOptimalPosition("middle".to_string()))
    );

    let err = serde_json::from_value::<InsertObjectOptions>(serde_json::json!({
        "find_optimal_position": "middle"
    }))
    .unwrap_err();
    assert!(err.to_string().contains("middle"));
}
