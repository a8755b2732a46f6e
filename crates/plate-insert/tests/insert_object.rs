use plate_insert::{
    ChildConstraint, DeleteOptions, Document, Editor, InsertObjectError, InsertObjectOptions,
    ModelError, Node, NodeRole, NodeSpec, OptimalPosition, PlatePlugin, PluginRegistry, Position,
    Range, Selectable, Selection, SelectionPlacement, table_node,
};
use pretty_assertions::assert_eq;

fn editor(children: Vec<Node>, focus: Position) -> Editor {
    Editor::new(
        Document::new(children),
        Selection::collapsed(focus),
        PluginRegistry::richtext(),
    )
}

fn options(
    find_optimal_position: Option<OptimalPosition>,
    set_selection: Option<SelectionPlacement>,
) -> InsertObjectOptions {
    InsertObjectOptions {
        find_optimal_position,
        set_selection,
    }
}

fn image(src: &str) -> Node {
    Node::image(src, None)
}

#[test]
fn block_object_goes_before_paragraph_instead_of_splitting_it() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &options(Some(OptimalPosition::Auto), None),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![image("a.png"), Node::paragraph("hello")]
    );
    assert_eq!(range, Range::new(Position::root(0), Position::root(1)));
    assert_eq!(
        editor.selection(),
        &Selection::on(editor.doc(), &[0]).unwrap()
    );
}

#[test]
fn block_object_goes_after_paragraph_when_caret_is_at_its_end() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 5));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &options(Some(OptimalPosition::Auto), None),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![Node::paragraph("hello"), image("a.png")]
    );
    assert_eq!(range, Range::new(Position::root(1), Position::root(2)));
}

#[test]
fn empty_paragraph_is_replaced_and_formatting_carried_over() {
    let block = Node::paragraph("")
        .with_attr("align", "center")
        .with_attr("indent", 1);
    let mut editor = editor(vec![block], Position::new(vec![0], 0));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &options(Some(OptimalPosition::Auto), Some(SelectionPlacement::After)),
        )
        .unwrap();

    // Images allow `align` but not `indent`.
    assert_eq!(
        editor.doc().children,
        vec![
            image("a.png").with_attr("align", "center"),
            Node::paragraph("")
                .with_attr("align", "center")
                .with_attr("indent", 1),
        ]
    );
    assert_eq!(range, Range::new(Position::root(0), Position::root(1)));
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![1], 0))
    );
}

#[test]
fn without_optimal_position_the_paragraph_is_split() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![
            Node::paragraph("he"),
            image("a.png"),
            Node::paragraph("llo"),
        ]
    );
    assert_eq!(
        range,
        Range::new(Position::new(vec![0], 2), Position::new(vec![2], 0))
    );
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![2], 0))
    );
}

#[test]
fn deleting_the_returned_range_restores_a_split_paragraph() {
    let original = vec![Node::paragraph("hello")];
    let mut editor = editor(original.clone(), Position::new(vec![0], 2));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap();
    editor
        .delete_content(&range, DeleteOptions::default())
        .unwrap();

    assert_eq!(editor.doc().children, original);
}

#[test]
fn deleting_the_returned_range_restores_a_replaced_empty_paragraph() {
    let original = vec![Node::paragraph("a"), Node::paragraph("")];
    let mut editor = editor(original.clone(), Position::new(vec![1], 0));

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap();
    assert_eq!(
        editor.doc().children,
        vec![Node::paragraph("a"), image("a.png")]
    );

    editor
        .delete_content(&range, DeleteOptions::default())
        .unwrap();
    assert_eq!(editor.doc().children, original);
}

#[test]
fn inline_object_is_inserted_in_place_even_with_optimal_position() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    let range = editor
        .insert_object(
            Node::mention("@alice"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![Node::element(
            "paragraph",
            vec![
                Node::text("he"),
                Node::mention("@alice"),
                Node::text("llo"),
            ],
        )]
    );
    assert_eq!(
        range,
        Range::new(Position::new(vec![0], 2), Position::new(vec![0], 3))
    );
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![0], 3))
    );
}

#[test]
fn inline_object_replaces_selected_text() {
    let doc = Document::new(vec![Node::paragraph("hello")]);
    let selection = Selection {
        anchor: Position::new(vec![0], 4),
        focus: Position::new(vec![0], 1),
    };
    let mut editor = Editor::new(doc, selection, PluginRegistry::richtext());

    let range = editor
        .insert_object(
            Node::mention("@bob"),
            Selectable::None,
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![Node::element(
            "paragraph",
            vec![Node::text("h"), Node::mention("@bob"), Node::text("o")],
        )]
    );
    assert_eq!(
        range,
        Range::new(Position::new(vec![0], 1), Position::new(vec![0], 2))
    );
}

#[test]
fn inline_object_between_blocks_is_wrapped_in_a_paragraph() {
    let mut editor = editor(
        vec![Node::divider(), Node::paragraph("x")],
        Position::new(vec![1], 0),
    );

    let range = editor
        .insert_object(
            Node::mention("@alice"),
            Selectable::Position(Position::root(1)),
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![
            Node::divider(),
            Node::element("paragraph", vec![Node::mention("@alice")]),
            Node::paragraph("x"),
        ]
    );
    assert_eq!(range, Range::new(Position::root(1), Position::root(2)));
}

#[test]
fn selection_is_placed_on_the_object() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &options(Some(OptimalPosition::Auto), Some(SelectionPlacement::On)),
        )
        .unwrap();

    assert_eq!(
        editor.selection(),
        &Selection {
            anchor: Position::root(0),
            focus: Position::root(1),
        }
    );
}

#[test]
fn selection_after_block_object_uses_following_text_block() {
    let mut editor = editor(
        vec![Node::paragraph("hello"), Node::paragraph("next")],
        Position::new(vec![0], 5),
    );

    editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![
            Node::paragraph("hello"),
            image("a.png"),
            Node::paragraph("next"),
        ]
    );
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![2], 0))
    );
}

#[test]
fn selection_after_block_object_creates_paragraph_when_next_is_an_object() {
    let mut editor = editor(
        vec![Node::paragraph("hello"), Node::divider()],
        Position::new(vec![0], 5),
    );

    editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![
            Node::paragraph("hello"),
            image("a.png"),
            Node::paragraph(""),
            Node::divider(),
        ]
    );
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![2], 0))
    );
}

#[test]
fn selected_block_object_is_replaced_or_kept() {
    let children = vec![Node::paragraph("a"), image("old.png"), Node::paragraph("b")];

    let cases = [
        (
            OptimalPosition::Auto,
            vec![Node::paragraph("a"), image("new.png"), Node::paragraph("b")],
        ),
        (
            OptimalPosition::Before,
            vec![
                Node::paragraph("a"),
                image("new.png"),
                image("old.png"),
                Node::paragraph("b"),
            ],
        ),
        (
            OptimalPosition::After,
            vec![
                Node::paragraph("a"),
                image("old.png"),
                image("new.png"),
                Node::paragraph("b"),
            ],
        ),
    ];

    for (placement, expected) in cases {
        let doc = Document::new(children.clone());
        let selection = Selection::on(&doc, &[1]).unwrap();
        let mut editor = Editor::new(doc, selection, PluginRegistry::richtext());

        editor
            .insert_object(
                image("new.png"),
                Selectable::None,
                None,
                &options(Some(placement), None),
            )
            .unwrap();

        assert_eq!(editor.doc().children, expected, "placement {placement}");
    }
}

#[test]
fn replaced_block_object_passes_its_formatting_on() {
    let doc = Document::new(vec![
        Node::paragraph("a"),
        image("old.png").with_attr("align", "center"),
    ]);
    let selection = Selection::on(&doc, &[1]).unwrap();
    let mut editor = Editor::new(doc, selection, PluginRegistry::richtext());

    let range = editor
        .insert_object(
            image("new.png"),
            Selectable::None,
            None,
            &options(Some(OptimalPosition::Auto), None),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![
            Node::paragraph("a"),
            image("new.png").with_attr("align", "center"),
        ]
    );
    assert_eq!(range, Range::new(Position::root(1), Position::root(2)));
}

#[test]
fn object_is_inserted_inside_a_table_cell() {
    let mut editor = editor(vec![table_node(1, 1)], Position::new(vec![0, 0, 0, 0], 0));

    editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    let expected = Node::element(
        "table",
        vec![Node::element(
            "table_row",
            vec![Node::element(
                "table_cell",
                vec![image("a.png"), Node::paragraph("")],
            )],
        )],
    );
    assert_eq!(editor.doc().children, vec![expected]);
    assert_eq!(
        editor.selection(),
        &Selection::collapsed(Position::new(vec![0, 0, 0, 1], 0))
    );
}

#[test]
fn non_object_is_rejected_without_changes() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    let err = editor
        .insert_object(
            Node::paragraph("nope"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap_err();

    assert_eq!(
        err,
        InsertObjectError::NotAnObject {
            kind: "paragraph".to_string()
        }
    );
    assert_eq!(editor.doc().children, vec![Node::paragraph("hello")]);
    assert!(editor.last_transaction().is_none());
}

#[test]
fn invalid_target_fails_before_changes() {
    let mut editor = editor(vec![Node::paragraph("hello")], Position::new(vec![0], 2));

    let err = editor
        .insert_object(
            image("a.png"),
            Selectable::Node(vec![0]),
            None,
            &InsertObjectOptions::default(),
        )
        .unwrap_err();

    assert!(matches!(err, InsertObjectError::Model(_)));
    assert_eq!(editor.doc().children, vec![Node::paragraph("hello")]);
}

#[test]
fn stale_selection_is_rejected() {
    let mut editor = editor(vec![Node::paragraph("a")], Position::new(vec![0], 0));

    let err = editor
        .insert_object(
            image("a.png"),
            Selectable::Selection(Selection::collapsed(Position::new(vec![5], 3))),
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap_err();

    assert!(matches!(err, InsertObjectError::Model(ModelError::InvalidPath(_))));
    assert_eq!(editor.doc().children, vec![Node::paragraph("a")]);
    assert!(editor.last_transaction().is_none());
}

#[test]
fn position_inside_a_character_is_rejected() {
    let mut editor = editor(vec![Node::paragraph("é")], Position::new(vec![0], 0));

    let err = editor
        .insert_object(
            Node::mention("@a"),
            Selectable::Position(Position::new(vec![0], 1)),
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap_err();

    assert!(matches!(err, InsertObjectError::Model(ModelError::InvalidPath(_))));
    assert_eq!(editor.doc().children, vec![Node::paragraph("é")]);
}

struct StrictPlugin;

impl PlatePlugin for StrictPlugin {
    fn id(&self) -> &'static str {
        "strict"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new(
                "$root",
                NodeRole::Block,
                ChildConstraint::Kinds(vec!["paragraph".to_string()]),
            ),
            NodeSpec::new("paragraph", NodeRole::Block, ChildConstraint::InlineOnly),
            NodeSpec::new("image", NodeRole::Block, ChildConstraint::None).object(),
        ]
    }
}

#[test]
fn nothing_is_inserted_where_no_ancestor_accepts_the_object() {
    let registry = PluginRegistry::new([Box::new(StrictPlugin) as Box<dyn PlatePlugin>]).unwrap();
    let doc = Document::new(vec![Node::paragraph("a")]);
    let mut editor = Editor::new(
        doc,
        Selection::collapsed(Position::new(vec![0], 1)),
        registry,
    );

    let range = editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    // The caret is at the end of the paragraph, so the attempt was after it.
    assert_eq!(range, Range::collapsed(Position::root(1)));
    assert_eq!(editor.doc().children, vec![Node::paragraph("a")]);
    assert!(editor.last_transaction().is_none());
}

struct GalleryPlugin;

impl PlatePlugin for GalleryPlugin {
    fn id(&self) -> &'static str {
        "gallery"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::new(
                "gallery",
                NodeRole::Block,
                ChildConstraint::Kinds(vec!["image".to_string()]),
            ),
            NodeSpec::new("image", NodeRole::Block, ChildConstraint::None).object(),
        ]
    }
}

#[test]
fn selection_after_stays_on_object_without_text_position() {
    let mut registry = PluginRegistry::core();
    registry.register_plugin(Box::new(GalleryPlugin)).unwrap();
    let doc = Document::new(vec![Node::element("gallery", vec![image("a.png")])]);
    let mut editor = Editor::new(
        doc,
        Selection::collapsed(Position::new(vec![0], 1)),
        registry,
    );

    let range = editor
        .insert_object(
            image("b.png"),
            Selectable::Position(Position::new(vec![0], 1)),
            None,
            &options(Some(OptimalPosition::Auto), Some(SelectionPlacement::After)),
        )
        .unwrap();

    assert_eq!(
        editor.doc().children,
        vec![Node::element("gallery", vec![image("a.png"), image("b.png")])]
    );
    assert_eq!(
        range,
        Range::new(Position::new(vec![0], 1), Position::new(vec![0], 2))
    );
    assert_eq!(
        editor.selection(),
        &Selection::on(editor.doc(), &[0, 1]).unwrap()
    );
}

#[test]
fn insertion_is_recorded_as_one_transaction() {
    let mut editor = editor(vec![Node::paragraph("")], Position::new(vec![0], 0));

    editor
        .insert_object(
            image("a.png"),
            Selectable::None,
            None,
            &InsertObjectOptions::interactive(),
        )
        .unwrap();

    let tx = editor.last_transaction().unwrap();
    assert_eq!(tx.meta.source.as_deref(), Some("insert_object"));
    assert_eq!(
        tx.selection_after,
        Some(Selection::collapsed(Position::new(vec![1], 0)))
    );
    assert!(!tx.ops.is_empty());
}
