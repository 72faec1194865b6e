//! Integration tests for turning function signatures into node definitions.

use serde_json::json;
use taskport::prelude::*;
use taskport::{DefinitionError, NodeKind, PortKind, Widget, prepare_definition};

#[derive(Debug, Clone, PartialEq)]
struct Image {
    id: String,
}

fn registry() -> StructureRegistry {
    let mut registry = StructureRegistry::new();
    registry
        .register::<Image, _, _>(
            "@demo/image",
            |image| Ok(json!(image.id)),
            |wire| {
                wire.as_str()
                    .map(|id| Image { id: id.to_string() })
                    .ok_or_else(|| StructureError::conversion("@demo/image", "expected an id"))
            },
        )
        .unwrap()
        .with_widget(Widget::search("query { images { value: id label: name } }"));
    registry
}

#[test]
fn test_optional_argument_without_default() {
    let signature = FunctionSignature::new("f")
        .param("x", TypeDescriptor::Int)
        .param_with_default(
            "y",
            TypeDescriptor::optional(TypeDescriptor::String),
            Value::Null,
        )
        .returns(TypeDescriptor::Bool)
        .doc("Check a thing");

    let definition = prepare_definition(
        &signature,
        &StructureRegistry::new(),
        &DefinitionOptions::new().allow_empty_doc(true),
    )
    .unwrap();

    assert_eq!(definition.name, "Check a thing");
    assert_eq!(definition.interface, "f");
    assert_eq!(definition.description, "No Description");
    assert_eq!(definition.kind, NodeKind::Function);

    assert_eq!(definition.args.len(), 2);
    let x = &definition.args[0];
    assert_eq!((x.key.as_str(), x.kind, x.nullable), ("x", PortKind::Int, false));
    assert_eq!(x.default, None);
    let y = &definition.args[1];
    assert_eq!((y.key.as_str(), y.kind, y.nullable), ("y", PortKind::String, true));
    assert_eq!(y.default, None);

    assert_eq!(definition.returns.len(), 1);
    assert_eq!(definition.returns[0].key, "return0");
    assert_eq!(definition.returns[0].kind, PortKind::Bool);
}

#[test]
fn test_tuple_return_becomes_several_ports() {
    let signature = FunctionSignature::new("split")
        .param("text", TypeDescriptor::String)
        .returns(TypeDescriptor::of::<(i64, String)>())
        .doc("Split\n\nSplits a text into a count and a remainder.");

    let definition =
        prepare_definition(&signature, &StructureRegistry::new(), &DefinitionOptions::new())
            .unwrap();

    let returns: Vec<_> = definition
        .returns
        .iter()
        .map(|port| (port.key.as_str(), port.kind))
        .collect();
    assert_eq!(
        returns,
        vec![("return0", PortKind::Int), ("return1", PortKind::String)]
    );
    assert_eq!(
        definition.description,
        "Splits a text into a count and a remainder."
    );
}

#[test]
fn test_structures_and_documentation() {
    let signature = FunctionSignature::new("ThresholdImage")
        .param("image", TypeDescriptor::structure::<Image>())
        .param_with_default("level", TypeDescriptor::Float, 0.5)
        .returns(TypeDescriptor::list(TypeDescriptor::structure::<Image>()))
        .doc(
            "Threshold\n\nThresholds an image.\n\nArgs:\n    image (Image): The image to threshold\n    level (float): The cut-off\n\nReturns:\n    List[Image]: The masks\n",
        );

    let definition = prepare_definition(
        &signature,
        &registry(),
        &DefinitionOptions::new().with_package("demo"),
    )
    .unwrap();

    assert_eq!(definition.interface, "threshold_image");
    assert_eq!(definition.package.as_deref(), Some("demo"));

    let image = definition.arg("image").unwrap();
    assert_eq!(image.kind, PortKind::Structure);
    assert_eq!(image.identifier.as_deref(), Some("@demo/image"));
    assert_eq!(image.description.as_deref(), Some("The image to threshold"));
    assert_eq!(
        image.widget.as_ref().map(|widget| widget.kind.as_str()),
        Some("SearchWidget")
    );

    let level = definition.arg("level").unwrap();
    assert_eq!(level.default, Some(json!(0.5)));

    let masks = &definition.returns[0];
    assert_eq!(masks.kind, PortKind::List);
    assert_eq!(masks.description.as_deref(), Some("The masks"));
    let child = masks.child.as_ref().unwrap();
    assert_eq!(child.identifier.as_deref(), Some("@demo/image"));
}

#[test]
fn test_errors_name_the_failing_port() {
    #[derive(Debug)]
    struct Unregistered;

    let signature = FunctionSignature::new("f")
        .param("ok", TypeDescriptor::Int)
        .param("bad", TypeDescriptor::structure::<Unregistered>())
        .doc("F\n\nTakes an unregistered structure.");
    let err = prepare_definition(&signature, &registry(), &DefinitionOptions::new())
        .unwrap_err();
    match err {
        DefinitionError::Argument { function, key, .. } => {
            assert_eq!(function, "f");
            assert_eq!(key, "bad");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let undocumented = FunctionSignature::new("g").param("x", TypeDescriptor::Int);
    assert!(matches!(
        prepare_definition(&undocumented, &registry(), &DefinitionOptions::new()),
        Err(DefinitionError::MissingDocumentation(name)) if name == "g"
    ));
}

#[test]
fn test_definition_serializes_with_wire_names() {
    let signature = FunctionSignature::new("count")
        .param("limit", TypeDescriptor::Int)
        .returns(TypeDescriptor::Int)
        .generator()
        .doc("Count\n\nCounts up to a limit.");
    let definition =
        prepare_definition(&signature, &StructureRegistry::new(), &DefinitionOptions::new())
            .unwrap();

    let wire = serde_json::to_value(&definition).unwrap();
    assert_eq!(wire["kind"], json!("GENERATOR"));
    assert_eq!(wire["args"][0]["kind"], json!("INT"));
    assert_eq!(wire["args"][0]["key"], json!("limit"));
}
