//! Behavioural properties checked across generated graphs.

use std::borrow::Cow;
use std::sync::Arc;

use cdo::{
    CompactBuffer, Engine, FieldType, FnTransform, Format, HookOutcome, Intercept, Node,
    PreonBuffer, PrimitiveType, SchemaRegistry, StreamingSink, Value, hook_fn, validate,
    validate_fully,
};
use proptest::prelude::*;

fn catalog() -> SchemaRegistry {
    SchemaRegistry::builder()
        .complex("Catalog", |t| t.repeated("Item", FieldType::complex("Item")))
        .complex("Item", |t| {
            t.required_with("Sku", PrimitiveType::Text, |f| f.pattern("[A-Z]{3}[0-9]{2}"))
                .required_with("Status", PrimitiveType::Text, |f| {
                    f.enumeration(["Open", "Closed", "Held"])
                        .common_values(["Open", "Closed"])
                })
                .optional_with("Quantity", PrimitiveType::Int, |f| {
                    f.range(Some(Value::Int(0)), Some(Value::Int(99)))
                })
                .optional("Note", PrimitiveType::Text)
        })
        .build()
        .unwrap()
}

fn lines() -> SchemaRegistry {
    SchemaRegistry::builder()
        .complex("Line", |t| {
            t.required("Code", PrimitiveType::Text)
                .required("Count", PrimitiveType::Int)
        })
        .build()
        .unwrap()
}

/// A record file whose entry type has a field of every primitive type.
fn ledger() -> SchemaRegistry {
    SchemaRegistry::builder()
        .complex("Ledger", |t| t.repeated("Entry", FieldType::complex("Entry")))
        .complex("Entry", |t| {
            t.required("Label", PrimitiveType::Text)
                .optional_with("Code", PrimitiveType::Text, |f| f.attribute())
                .optional("Flag", PrimitiveType::Bool)
                .optional("Count", PrimitiveType::Int)
                .optional("Ratio", PrimitiveType::Float)
                .optional("Amount", PrimitiveType::Decimal)
                .optional("Blob", PrimitiveType::Bytes)
                .optional("Day", PrimitiveType::Date)
                .optional("At", PrimitiveType::Time)
                .optional("Stamp", PrimitiveType::DateTime)
                .repeated("Tag", PrimitiveType::Text)
        })
        .build()
        .unwrap()
}

const TYPED_FIELDS: [&str; 8] = ["Flag", "Count", "Ratio", "Amount", "Blob", "Day", "At", "Stamp"];

#[derive(Debug, Clone)]
struct EntryRow {
    label: String,
    code: Option<String>,
    typed: Vec<Option<Value>>,
    tags: Vec<String>,
}

fn text() -> impl Strategy<Value = String> {
    r#"[a-zA-Z0-9&<>"',;|.][a-zA-Z0-9 &<>"',;|.\\]{0,9}"#
}

fn float() -> impl Strategy<Value = Value> {
    use prop::num::f64;
    (f64::POSITIVE | f64::NEGATIVE | f64::NORMAL | f64::SUBNORMAL | f64::ZERO | f64::INFINITE)
        .prop_map(Value::Float)
}

fn decimal() -> impl Strategy<Value = Value> {
    prop_oneof![
        (any::<i64>(), -40i32..=40).prop_map(|(m, e)| Value::decimal(m, e)),
        Just(Value::decimal(1, 19)),
        Just(Value::decimal(i64::MIN, 0)),
        Just(Value::decimal(i64::MAX, -25)),
    ]
}

fn offset() -> impl Strategy<Value = i16> {
    -840i16..=840
}

fn typed_values() -> impl Strategy<Value = Vec<Option<Value>>> {
    (
        prop::option::of(any::<bool>().prop_map(Value::Bool)),
        prop::option::of(any::<i64>().prop_map(Value::Int)),
        prop::option::of(float()),
        prop::option::of(decimal()),
        prop::option::of(prop::collection::vec(any::<u8>(), 1..16).prop_map(Value::Bytes)),
        prop::option::of(
            (-300_000i32..2_900_000, offset()).prop_map(|(days, offset_min)| Value::Date { days, offset_min }),
        ),
        prop::option::of(
            (0i64..86_400_000_000, offset()).prop_map(|(micros, offset_min)| Value::Time { micros, offset_min }),
        ),
        prop::option::of(
            (-27_000_000_000_000_000i64..250_000_000_000_000_000, offset()).prop_map(
                |(epoch_micros, offset_min)| Value::DateTime {
                    epoch_micros,
                    offset_min,
                },
            ),
        ),
    )
        .prop_map(|(a, b, c, d, e, f, g, h)| vec![a, b, c, d, e, f, g, h])
}

fn entry_row() -> impl Strategy<Value = EntryRow> {
    (
        text(),
        prop::option::of(text()),
        typed_values(),
        prop::collection::vec(text(), 0..4),
    )
        .prop_map(|(label, code, typed, tags)| EntryRow {
            label,
            code,
            typed,
            tags,
        })
}

fn build_ledger(registry: &SchemaRegistry, entries: &[EntryRow]) -> Node {
    let mut root = registry.new_node("Ledger").unwrap();
    for row in entries {
        let mut entry = registry.new_node("Entry").unwrap();
        entry.set("Label", row.label.as_str()).unwrap();
        if let Some(code) = &row.code {
            entry.set("Code", code.as_str()).unwrap();
        }
        for (field, value) in TYPED_FIELDS.iter().zip(&row.typed) {
            if let Some(value) = value {
                entry.set(field, value.clone()).unwrap();
            }
        }
        for tag in &row.tags {
            entry.push("Tag", tag.as_str()).unwrap();
        }
        root.push_child("Entry", entry).unwrap();
    }
    root
}

#[derive(Debug, Clone)]
struct ItemRow {
    sku: String,
    status: &'static str,
    quantity: Option<i64>,
    note: Option<String>,
}

fn item_row() -> impl Strategy<Value = ItemRow> {
    (
        "[A-Z]{3}[0-9]{2}",
        prop::sample::select(vec!["Open", "Closed", "Held"]),
        prop::option::of(0i64..100),
        prop::option::of("[a-zA-Z0-9<>&]{1,12}"),
    )
        .prop_map(|(sku, status, quantity, note)| ItemRow {
            sku,
            status,
            quantity,
            note,
        })
}

fn build(registry: &SchemaRegistry, items: &[ItemRow]) -> Node {
    let mut root = registry.new_node("Catalog").unwrap();
    for row in items {
        let mut item = registry.new_node("Item").unwrap();
        item.set("Sku", row.sku.as_str()).unwrap();
        item.set("Status", row.status).unwrap();
        if let Some(quantity) = row.quantity {
            item.set("Quantity", quantity).unwrap();
        }
        if let Some(note) = &row.note {
            item.set("Note", note.as_str()).unwrap();
        }
        root.push_child("Item", item).unwrap();
    }
    root
}

proptest! {
    #[test]
    fn parse_of_written_text_is_stable(items in prop::collection::vec(item_row(), 0..8)) {
        let engine = Engine::new(catalog());
        let root = build(engine.registry(), &items);

        for format in [Format::Xml, Format::Json] {
            let written = engine.write(&root).format(format).to_vec().unwrap();
            let parsed = engine.parse("Catalog").format(format).from_slice(&written).unwrap();
            prop_assert_eq!(&parsed, &root);
            let rewritten = engine.write(&parsed).format(format).to_vec().unwrap();
            prop_assert_eq!(rewritten, written);
        }
    }

    #[test]
    fn every_primitive_survives_text_formats(entries in prop::collection::vec(entry_row(), 0..6)) {
        let engine = Engine::new(ledger());
        let root = build_ledger(engine.registry(), &entries);

        for format in [Format::Xml, Format::Json, Format::Delimited] {
            let written = engine.write(&root).format(format).to_vec().unwrap();
            let parsed = engine.parse("Ledger").format(format).from_slice(&written).unwrap();
            prop_assert_eq!(&parsed, &root, "{:?}", format);
            let rewritten = engine.write(&parsed).format(format).to_vec().unwrap();
            prop_assert_eq!(rewritten, written, "{:?}", format);
        }
    }

    #[test]
    fn every_primitive_survives_binary_encodings(entries in prop::collection::vec(entry_row(), 0..6)) {
        let engine = Engine::new(ledger());
        let root = build_ledger(engine.registry(), &entries);

        let compact = engine.to_compact(&root).unwrap();
        prop_assert_eq!(engine.to_cdo(&compact).unwrap(), root.clone());
        let preon = engine.compact_to_preon(&compact).unwrap();
        prop_assert_eq!(engine.preon_to_cdo(&preon).unwrap(), root);
        prop_assert_eq!(engine.preon_to_compact(&preon).unwrap(), compact);
    }

    #[test]
    fn binary_encodings_are_lossless(items in prop::collection::vec(item_row(), 0..8)) {
        let engine = Engine::new(catalog());
        let root = build(engine.registry(), &items);

        let compact = engine.to_compact(&root).unwrap();
        let reloaded = CompactBuffer::from_bytes(compact.to_bytes()).unwrap();
        prop_assert_eq!(reloaded.to_node(engine.registry()).unwrap(), root.clone());

        let preon = engine.to_preon(&root).unwrap();
        let reloaded = PreonBuffer::from_bytes(preon.to_bytes()).unwrap();
        prop_assert_eq!(reloaded.to_node(engine.registry()).unwrap(), root);
        prop_assert!(preon.size() <= compact.size());
    }

    #[test]
    fn fail_fast_reports_first_exhaustive_violation(
        items in prop::collection::vec(
            (prop::sample::select(vec!["ABC12", "abc"]), -5i64..105),
            1..10,
        )
    ) {
        let registry = catalog();
        let rows: Vec<_> = items
            .iter()
            .map(|(sku, quantity)| ItemRow {
                sku: sku.to_string(),
                status: "Open",
                quantity: Some(*quantity),
                note: None,
            })
            .collect();
        let root = build(&registry, &rows);
        let expected = items
            .iter()
            .map(|(sku, quantity)| usize::from(*sku == "abc") + usize::from(!(0..100).contains(quantity)))
            .sum::<usize>();

        let report = validate_fully(&root);
        prop_assert_eq!(report.len(), expected);
        match validate(&root) {
            Ok(()) => prop_assert!(report.is_valid()),
            Err(first) => prop_assert_eq!(&first, &report.violations()[0]),
        }
    }

    #[test]
    fn declining_hook_leaves_output_unchanged(items in prop::collection::vec(item_row(), 0..6)) {
        let engine = Engine::new(catalog());
        let root = build(engine.registry(), &items);

        for format in [Format::Xml, Format::Json] {
            let plain = engine.write(&root).format(format).to_vec().unwrap();
            let mut offered = 0usize;
            let mut hook = hook_fn(|_: &mut Cow<'_, Node>, _: &mut StreamingSink<'_>| {
                offered += 1;
                Ok(HookOutcome::Declined)
            });
            let hooked = engine
                .write(&root)
                .format(format)
                .intercept(Intercept::All)
                .with_hook(&mut hook)
                .to_vec()
                .unwrap();
            drop(hook);
            prop_assert_eq!(hooked, plain);
            prop_assert_eq!(offered, items.len() + 1);
        }
    }
}

#[test]
fn pooled_view_reads_last_bound_sibling() {
    let engine = Engine::new(catalog());
    let rows: Vec<_> = ["AAA01", "BBB02", "CCC03"]
        .into_iter()
        .map(|sku| ItemRow {
            sku: sku.to_string(),
            status: "Open",
            quantity: None,
            note: None,
        })
        .collect();
    let root = build(engine.registry(), &rows);
    let buffer = engine.to_compact(&root).unwrap();

    let pool = engine.pool();
    let pooled = pool.root(&buffer).unwrap();
    let first = pooled.child_at("Item", 0).unwrap().unwrap();
    let second = pooled.child_at("Item", 1).unwrap().unwrap();
    let third = pooled.child_at("Item", 2).unwrap().unwrap();
    assert_eq!(third.get("Sku").unwrap(), Some(Value::from("CCC03")));
    assert_eq!(first.get("Sku").unwrap(), Some(Value::from("CCC03")));
    assert_eq!(second.get("Sku").unwrap(), Some(Value::from("CCC03")));

    // The borrowing view has no shared slot.
    let view = engine.view(&buffer).unwrap();
    let first = view.child_at("Item", 0).unwrap().unwrap();
    view.child_at("Item", 2).unwrap().unwrap();
    assert_eq!(first.get("Sku").unwrap(), Some(Value::from("AAA01")));
}

#[test]
fn fan_out_equals_one_to_one() {
    let engine = Engine::new(catalog());
    let rows: Vec<_> = (0..4)
        .map(|i| ItemRow {
            sku: format!("SKU{i:02}"),
            status: "Held",
            quantity: Some(i * 10),
            note: None,
        })
        .collect();
    let root = build(engine.registry(), &rows);

    let mut transforms = engine.transforms(Arc::new(lines()));
    transforms
        .register(FnTransform::one_to_one("item-to-line", "Item", "Line", |cx, item| {
            let mut line = cx.new_node("Line")?;
            line.set("Code", item.get_text("Sku").unwrap_or_default()).unwrap();
            line.set("Count", item.get("Quantity").and_then(Value::as_int).unwrap_or(0))
                .unwrap();
            Ok(line)
        }))
        .unwrap();

    let items = root.children("Item").to_vec();
    let single: Vec<Node> = items
        .iter()
        .map(|item| transforms.transform_one("item-to-line", item).unwrap())
        .collect();
    let many = transforms.transform_many("item-to-line", vec![items.clone()]).unwrap();
    assert_eq!(many, vec![single.clone()]);
    assert_eq!(transforms.dispatch(vec![items]).unwrap(), vec![single]);
}
