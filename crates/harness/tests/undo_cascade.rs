use std::collections::BTreeMap;

use editlog_core::{
    Actor, ActorRole, EditAction, EditId, EditRecord, EntityKind, FieldValue, RelationChanges,
    RelationItem, RelationType, TargetId,
};
use editlog_engine::{UndoOptions, UndoOutcome};
use editlog_harness::{FailingActivityLog, MINUTE_MS, TestSite, init_tracing};
use editlog_storage::{ActivityKind, Storage};

fn moderator() -> Actor {
    Actor::new(7, ActorRole::Moderator)
}

fn text(s: &str) -> FieldValue {
    FieldValue::from(s)
}

/// T changes title_jp "a" -> "b"; O2 (+10min) "b" -> "c"; O3 (+20min) "c" -> "d".
struct Chain {
    site: TestSite,
    game: TargetId,
    t: EditRecord,
    o2: EditRecord,
    o3: EditRecord,
}

fn chain(mut site: TestSite) -> Result<Chain, Box<dyn std::error::Error>> {
    init_tracing();
    let game = site.seed_game(1, vec![("title_jp", text("a"))])?;
    let base = TestSite::base_time()?;
    let t = site.record_scalar(&EntityKind::Game, game, "title_jp", (text("a"), text("b")), base)?;
    let o2 = site.record_scalar(
        &EntityKind::Game,
        game,
        "title_jp",
        (text("b"), text("c")),
        base.plus_millis(10 * MINUTE_MS),
    )?;
    let o3 = site.record_scalar(
        &EntityKind::Game,
        game,
        "title_jp",
        (text("c"), text("d")),
        base.plus_millis(20 * MINUTE_MS),
    )?;
    Ok(Chain { site, game, t, o2, o3 })
}

#[test]
fn dry_run_reports_plan_without_writing() -> Result<(), Box<dyn std::error::Error>> {
    let Chain { mut site, game, t, o2, o3 } = chain(TestSite::new()?)?;
    let edits = site.edit_count()?;
    let transactions = site.transactions_begun();

    let outcome = site
        .engine
        .undo(t.id, &moderator(), UndoOptions::cascade().dry_run())?;
    let UndoOutcome::DryRun(plan) = outcome else {
        panic!("expected a dry run");
    };
    assert_eq!(plan.target, t.id);
    assert_eq!(plan.will_undo, vec![t.id, o3.id, o2.id]);
    assert_eq!(plan.conflicts, vec![o2.id, o3.id]);

    assert_eq!(site.edit_count()?, edits);
    assert_eq!(site.transactions_begun(), transactions);
    assert_eq!(site.field(&EntityKind::Game, game, "title_jp")?, Some(text("d")));
    assert_eq!(site.index.upsert_count(), 0);
    Ok(())
}

#[test]
fn cascade_reverses_newest_first() -> Result<(), Box<dyn std::error::Error>> {
    let Chain { mut site, game, t, o2, o3 } = chain(TestSite::new()?)?;

    let outcome = site.engine.undo(t.id, &moderator(), UndoOptions::cascade())?;
    let UndoOutcome::Applied(report) = outcome else {
        panic!("expected an applied undo");
    };
    assert_eq!(report.plan.will_undo, vec![t.id, o3.id, o2.id]);
    assert_eq!(report.undo_records.len(), 3);

    // Undo records reference O3, O2, then T, and sort in that order.
    let undos: Vec<EditRecord> = report
        .undo_records
        .iter()
        .map(|id| site.engine.get_edit(*id))
        .collect::<Result<Option<Vec<_>>, _>>()?
        .ok_or("undo record missing")?;
    let reversed: Vec<Option<EditId>> = undos.iter().map(|u| u.undo_of).collect();
    assert_eq!(reversed, vec![Some(o3.id), Some(o2.id), Some(t.id)]);
    assert!(undos.windows(2).all(|w| w[0].created < w[1].created));
    assert!(undos.iter().all(|u| u.undo && u.actor_id == moderator().id));

    // Activity entries were emitted in the same order.
    let activity_edits: Vec<EditId> = site
        .engine
        .activities(&EntityKind::Game, game)?
        .into_iter()
        .filter(|a| a.descriptor.kind == ActivityKind::EditUndone)
        .map(|a| a.descriptor.edit_id)
        .collect();
    assert_eq!(activity_edits, report.undo_records);

    assert_eq!(site.field(&EntityKind::Game, game, "title_jp")?, Some(text("a")));
    assert_eq!(site.index.upsert_count(), 1);

    // Every record on the chain now has its undo record.
    for id in [t.id, o2.id, o3.id] {
        let err = site
            .engine
            .undo(id, &moderator(), UndoOptions::cascade())
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_UNDONE");
    }
    Ok(())
}

#[test]
fn cascade_skips_edits_already_undone() -> Result<(), Box<dyn std::error::Error>> {
    let Chain { mut site, game, t, o2, o3 } = chain(TestSite::new()?)?;

    let first = site.engine.undo(o3.id, &moderator(), UndoOptions::strict())?;
    let UndoOutcome::Applied(first) = first else {
        panic!("expected an applied undo");
    };
    let u3 = first.undo_records[0];
    assert_eq!(site.field(&EntityKind::Game, game, "title_jp")?, Some(text("c")));

    let plan = site
        .engine
        .undo(t.id, &moderator(), UndoOptions::cascade().dry_run())?
        .plan()
        .clone();
    assert_eq!(plan.conflicts, vec![o2.id, o3.id, u3]);
    assert_eq!(plan.will_undo, vec![t.id, o2.id]);

    site.engine.undo(t.id, &moderator(), UndoOptions::cascade())?;
    assert_eq!(site.field(&EntityKind::Game, game, "title_jp")?, Some(text("a")));

    let storage = site.engine.storage();
    for id in [t.id, o2.id, o3.id] {
        assert!(storage.find_undo_of(id)?.is_some());
    }
    // U3 cancelled O3 and stays as it was.
    assert!(storage.find_undo_of(u3)?.is_none());
    // O3 still has exactly its first undo record.
    let o3_undos = storage
        .get_history(&EntityKind::Game, game)?
        .into_iter()
        .filter(|r| r.undo_of == Some(o3.id))
        .count();
    assert_eq!(o3_undos, 1);
    Ok(())
}

/// T sets title "a" -> "b"; O then sets title "c" and description "y".
fn wide_overlap() -> Result<(TestSite, TargetId, EditId, EditId), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let game = site.seed_game(6, vec![("title", text("a")), ("description", text("x"))])?;
    let editor = Actor::new(3, ActorRole::Editor);
    let t = site
        .engine
        .update_fields(
            &EntityKind::Game,
            game,
            &editor,
            BTreeMap::from([("title".to_string(), text("b"))]),
            None,
        )?
        .ok_or("expected a record")?;
    let o = site
        .engine
        .update_fields(
            &EntityKind::Game,
            game,
            &editor,
            BTreeMap::from([
                ("title".to_string(), text("c")),
                ("description".to_string(), text("y")),
            ]),
            None,
        )?
        .ok_or("expected a record")?;
    Ok((site, game, t, o))
}

fn only_undo(outcome: UndoOutcome) -> Result<EditId, Box<dyn std::error::Error>> {
    match outcome {
        UndoOutcome::Applied(report) => Ok(*report.undo_records.first().ok_or("no undo record")?),
        UndoOutcome::DryRun(_) => Err("expected an applied undo".into()),
    }
}

#[test]
fn cascade_leaves_fields_of_a_cancelled_edit_alone() -> Result<(), Box<dyn std::error::Error>> {
    let (mut site, game, t, o) = wide_overlap()?;
    let uo = only_undo(site.engine.undo(o, &moderator(), UndoOptions::strict())?)?;
    assert_eq!(site.field(&EntityKind::Game, game, "description")?, Some(text("x")));

    let outcome = site.engine.undo(t, &moderator(), UndoOptions::cascade())?;
    assert_eq!(outcome.plan().conflicts, vec![o, uo]);
    assert_eq!(outcome.plan().will_undo, vec![t]);

    assert_eq!(site.field(&EntityKind::Game, game, "title")?, Some(text("a")));
    assert_eq!(site.field(&EntityKind::Game, game, "description")?, Some(text("x")));
    assert!(site.engine.storage().find_undo_of(uo)?.is_none());
    Ok(())
}

#[test]
fn cascade_reverses_a_redone_edit_once() -> Result<(), Box<dyn std::error::Error>> {
    let (mut site, game, t, o) = wide_overlap()?;
    let uo = only_undo(site.engine.undo(o, &moderator(), UndoOptions::strict())?)?;
    let redo = only_undo(site.engine.undo(uo, &moderator(), UndoOptions::strict())?)?;
    assert_eq!(site.field(&EntityKind::Game, game, "description")?, Some(text("y")));

    let outcome = site.engine.undo(t, &moderator(), UndoOptions::cascade())?;
    assert_eq!(outcome.plan().conflicts, vec![o, uo, redo]);
    assert_eq!(outcome.plan().will_undo, vec![t, redo]);

    assert_eq!(site.field(&EntityKind::Game, game, "title")?, Some(text("a")));
    assert_eq!(site.field(&EntityKind::Game, game, "description")?, Some(text("x")));
    Ok(())
}

#[test]
fn failure_mid_cascade_rolls_back_everything() -> Result<(), Box<dyn std::error::Error>> {
    let site = TestSite::new()?.with_activity_log(Box::new(FailingActivityLog::failing_on(2)));
    let Chain { mut site, game, t, .. } = chain(site)?;
    let edits = site.edit_count()?;

    let err = site
        .engine
        .undo(t.id, &moderator(), UndoOptions::cascade())
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE");

    assert_eq!(site.edit_count()?, edits);
    assert_eq!(site.field(&EntityKind::Game, game, "title_jp")?, Some(text("d")));
    assert!(site.engine.activities(&EntityKind::Game, game)?.is_empty());
    assert_eq!(site.index.upsert_count(), 0);
    assert!(site.engine.storage().find_undo_of(t.id)?.is_none());
    Ok(())
}

#[test]
fn cascade_without_overlaps_undoes_only_the_target() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let game = site.seed_game(4, vec![])?;
    let base = TestSite::base_time()?;
    let target = site.record_scalar(
        &EntityKind::Game,
        game,
        "release_date",
        (FieldValue::Null, FieldValue::Timestamp(1_093_305_600)),
        base,
    )?;
    site.record_scalar(
        &EntityKind::Game,
        game,
        "title",
        (FieldValue::Null, text("Planetarian")),
        base.plus_millis(MINUTE_MS),
    )?;

    let outcome = site.engine.undo(target.id, &moderator(), UndoOptions::cascade())?;
    assert_eq!(outcome.plan().will_undo, vec![target.id]);
    assert!(outcome.plan().conflicts.is_empty());
    assert_eq!(
        site.field(&EntityKind::Game, game, "release_date")?,
        Some(FieldValue::Null)
    );
    assert_eq!(site.field(&EntityKind::Game, game, "title")?, Some(text("Planetarian")));
    Ok(())
}

#[test]
fn cascade_through_a_removal_is_refused_atomically() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut site = TestSite::new()?;
    let game = site.seed_game(5, vec![])?;
    let base = TestSite::base_time()?;
    let link = RelationItem::with_id(9).field("url", "https://example.org");

    let add = site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::AddRelation,
        RelationType::Link,
        RelationChanges {
            added: Some(vec![link.clone()]),
            ..Default::default()
        },
        base,
    )?;
    let remove = site.record_relation(
        &EntityKind::Game,
        game,
        EditAction::RemoveRelation,
        RelationType::Link,
        RelationChanges {
            removed: Some(vec![link]),
            ..Default::default()
        },
        base.plus_millis(MINUTE_MS),
    )?;

    let plan = site
        .engine
        .undo(add.id, &moderator(), UndoOptions::cascade().dry_run())?
        .plan()
        .clone();
    assert_eq!(plan.will_undo, vec![add.id, remove.id]);

    let edits = site.edit_count()?;
    let err = site
        .engine
        .undo(add.id, &moderator(), UndoOptions::cascade())
        .unwrap_err();
    assert_eq!(err.code(), "NOT_IMPLEMENTED");
    assert_eq!(site.edit_count()?, edits);
    Ok(())
}
