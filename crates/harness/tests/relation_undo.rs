use editlog_core::{
    Actor, ActorRole, EditAction, EditRecord, EntityKind, FieldMask, RelationChanges, RelationItem,
    RelationType,
};
use editlog_engine::{UndoOptions, UndoOutcome};
use editlog_harness::{MINUTE_MS, TestSite, init_tracing};
use editlog_storage::Storage;

fn moderator() -> Actor {
    Actor::new(7, ActorRole::Moderator)
}

fn link(url: &str, label: &str, name: &str) -> RelationItem {
    RelationItem::from_fields([("url", url), ("label", label), ("name", name)])
}

#[test]
fn add_undo_deletes_by_id_and_by_value_tuple() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let game = site.seed_game(1, vec![])?;
    let base = TestSite::base_time()?;

    // Rows present before the edit, one sharing url and label with the
    // id-less item.
    let existing = vec![
        link("u1", "l1", "n1"),
        link("u2", "l2", "other"),
    ];
    site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::AddRelation,
        RelationType::Link,
        RelationChanges {
            added: Some(existing.clone()),
            ..Default::default()
        },
        base,
    )?;

    let by_id = RelationItem::with_id(9)
        .field("url", "u9")
        .field("label", "l9")
        .field("name", "n9");
    let by_values = link("u2", "l2", "n2");
    let target = site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::AddRelation,
        RelationType::Link,
        RelationChanges {
            added: Some(vec![by_id, by_values]),
            ..Default::default()
        },
        base.plus_millis(MINUTE_MS),
    )?;
    assert_eq!(
        site.engine
            .get_relations(&EntityKind::Game, game, RelationType::Link)?
            .len(),
        4
    );

    let outcome = site.engine.undo(target.id, &moderator(), UndoOptions::strict())?;
    let UndoOutcome::Applied(report) = outcome else {
        panic!("expected an applied undo");
    };

    let left: Vec<RelationItem> = site
        .engine
        .get_relations(&EntityKind::Game, game, RelationType::Link)?
        .into_iter()
        .map(|row| row.item)
        .collect();
    assert_eq!(left, existing);

    let undo = site
        .engine
        .get_edit(report.undo_records[0])?
        .ok_or("undo record missing")?;
    assert_eq!(undo.action, EditAction::AddRelation);
    assert_eq!(undo.relation_type, Some(RelationType::Link));
    assert_eq!(undo.field_changes, vec!["links".to_string()]);
    let changes = undo.changes.as_relation().ok_or("expected relation changes")?;
    assert!(changes.added.is_none());
    assert_eq!(changes.removed.as_ref().map(Vec::len), Some(2));

    assert_eq!(site.index.upsert_count(), 1);
    Ok(())
}

#[test]
fn add_undo_of_developer_link() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let dev = site.seed(&EntityKind::Developer, 30, vec![])?;
    let target = site.record_relation(
        &EntityKind::Developer,
        dev,
        EditAction::AddRelation,
        RelationType::Image,
        RelationChanges {
            added: Some(vec![RelationItem::from_fields([("url", "logo.png"), ("caption", "logo")])]),
            ..Default::default()
        },
        TestSite::base_time()?,
    )?;

    site.engine.undo(target.id, &moderator(), UndoOptions::strict())?;
    assert!(site
        .engine
        .get_relations(&EntityKind::Developer, dev, RelationType::Image)?
        .is_empty());
    assert_eq!(site.index.upsert_count(), 0);
    Ok(())
}

#[test]
fn undo_of_an_add_undo_is_not_implemented() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let character = site.seed(&EntityKind::Character, 40, vec![])?;
    let target = site.record_relation(
        &EntityKind::Character,
        character,
        EditAction::AddRelation,
        RelationType::Link,
        RelationChanges {
            added: Some(vec![RelationItem::with_id(3)]),
            ..Default::default()
        },
        TestSite::base_time()?,
    )?;

    let outcome = site.engine.undo(target.id, &moderator(), UndoOptions::strict())?;
    let UndoOutcome::Applied(report) = outcome else {
        panic!("expected an applied undo");
    };
    let edits = site.edit_count()?;

    let err = site
        .engine
        .undo(report.undo_records[0], &moderator(), UndoOptions::strict())
        .unwrap_err();
    assert_eq!(err.code(), "NOT_IMPLEMENTED");
    assert_eq!(site.edit_count()?, edits);
    Ok(())
}

#[test]
fn relation_type_the_entity_lacks_has_no_inverse() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let character = site.seed(&EntityKind::Character, 41, vec![])?;
    // Characters carry no covers, so nothing could have written this record
    // through the engine; it only arrives from an imported history.
    let record = EditRecord::relation(
        EntityKind::Character,
        character,
        &Actor::new(3, ActorRole::Editor),
        EditAction::AddRelation,
        RelationType::Cover,
        RelationChanges {
            relation: RelationType::Cover.relation_name().to_string(),
            added: Some(vec![RelationItem::with_id(5)]),
            ..Default::default()
        },
        FieldMask::empty(),
        TestSite::base_time()?,
    );
    site.engine.storage_mut().append_edit(&record)?;
    let edits = site.edit_count()?;

    let err = site
        .engine
        .undo(record.id, &moderator(), UndoOptions::strict())
        .unwrap_err();
    assert_eq!(err.code(), "NOT_IMPLEMENTED");
    assert_eq!(site.edit_count()?, edits);
    Ok(())
}

#[test]
fn relation_edits_on_different_types_do_not_conflict() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let game = site.seed_game(2, vec![])?;
    let base = TestSite::base_time()?;
    let shared = RelationItem::with_id(1).field("url", "a.png");

    let target = site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::AddRelation,
        RelationType::Image,
        RelationChanges {
            added: Some(vec![shared.clone()]),
            ..Default::default()
        },
        base,
    )?;
    site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::AddRelation,
        RelationType::Cover,
        RelationChanges {
            added: Some(vec![shared]),
            ..Default::default()
        },
        base.plus_millis(MINUTE_MS),
    )?;

    site.engine.undo(target.id, &moderator(), UndoOptions::strict())?;
    assert!(site
        .engine
        .get_relations(&EntityKind::Game, game, RelationType::Image)?
        .is_empty());
    assert_eq!(
        site.engine
            .get_relations(&EntityKind::Game, game, RelationType::Cover)?
            .len(),
        1
    );
    Ok(())
}
