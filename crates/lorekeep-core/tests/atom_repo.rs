//! Atom repository integration tests against an in-memory store.

use std::sync::Arc;

use lorekeep_core::{
    AtomDraft, AtomKind, AtomRepository, AtomValidationError, RepoError, Store, TaskStatus,
};

fn repo() -> AtomRepository {
    let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
    AtomRepository::new(store)
}

#[test]
fn create_note_assigns_identity_and_timestamps() {
    let repo = repo();
    let atom = repo.create(&AtomDraft::note("hello world")).unwrap();

    assert_eq!(atom.kind, AtomKind::Note);
    assert_eq!(atom.content, "hello world");
    assert!(atom.tags.is_empty());
    assert!(!atom.is_deleted);
    assert_eq!(atom.created_at, atom.updated_at);
    assert!(atom.created_at > 0);
}

#[test]
fn create_task_defaults_to_todo() {
    let repo = repo();
    let atom = repo.create(&AtomDraft::task("do the thing")).unwrap();
    assert_eq!(atom.kind, AtomKind::Task);
    assert_eq!(atom.task_status, Some(TaskStatus::Todo));
}

#[test]
fn create_rejects_reversed_window() {
    let repo = repo();
    let err = repo
        .create(&AtomDraft::event("standup", 200, Some(100)))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(AtomValidationError::WindowReversed {
            start: 200,
            end: 100
        })
    ));
}

#[test]
fn create_rejects_end_without_start() {
    let repo = repo();
    let draft = AtomDraft {
        kind: Some(AtomKind::Event),
        content: "dangling end".into(),
        end_at: Some(500),
        ..AtomDraft::default()
    };
    let err = repo.create(&draft).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(AtomValidationError::EndWithoutStart { end: 500 })
    ));
}

#[test]
fn tags_are_normalized_on_create() {
    let repo = repo();
    let draft = AtomDraft {
        tags: vec!["Work".into(), " work ".into(), "".into(), "Alpha".into()],
        ..AtomDraft::note("tagged")
    };
    let atom = repo.create(&draft).unwrap();
    assert_eq!(atom.tags, vec!["alpha", "work"]);
}

#[test]
fn set_tags_is_idempotent_for_equivalent_sets() {
    let repo = repo();
    let atom = repo.create(&AtomDraft::note("n")).unwrap();

    let first = repo
        .set_tags(atom.id, &["B".into(), "a".into()])
        .unwrap();
    assert_eq!(first.tags, vec!["a", "b"]);

    let second = repo
        .set_tags(atom.id, &[" A ".into(), "b".into(), "B".into()])
        .unwrap();
    assert_eq!(second.tags, vec!["a", "b"]);
}

#[test]
fn update_content_bumps_updated_at() {
    let repo = repo();
    let atom = repo.create(&AtomDraft::note("v1")).unwrap();
    let updated = repo.update_content(atom.id, "v2").unwrap();
    assert_eq!(updated.content, "v2");
    assert!(updated.updated_at >= atom.updated_at);
    assert_eq!(updated.created_at, atom.created_at);
}

#[test]
fn status_applies_to_any_kind_and_clears() {
    let repo = repo();
    let note = repo.create(&AtomDraft::note("a note")).unwrap();

    let done = repo.update_status(note.id, Some(TaskStatus::Done)).unwrap();
    assert_eq!(done.task_status, Some(TaskStatus::Done));

    let cleared = repo.update_status(note.id, None).unwrap();
    assert_eq!(cleared.task_status, None);
}

#[test]
fn update_event_times_rejects_reversed_window_and_keeps_values() {
    let repo = repo();
    let atom = repo
        .create(&AtomDraft::event("meeting", 100, Some(200)))
        .unwrap();

    let err = repo
        .update_event_times(atom.id, Some(200), Some(100))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let reread = repo.fetch(atom.id).unwrap().unwrap();
    assert_eq!(reread.start_at, Some(100));
    assert_eq!(reread.end_at, Some(200));
}

#[test]
fn update_event_times_can_clear_window() {
    let repo = repo();
    let atom = repo
        .create(&AtomDraft::event("meeting", 100, Some(200)))
        .unwrap();
    let cleared = repo.update_event_times(atom.id, None, None).unwrap();
    assert_eq!(cleared.start_at, None);
    assert_eq!(cleared.end_at, None);
}

#[test]
fn soft_delete_hides_atom_and_is_not_repeatable() {
    let repo = repo();
    let atom = repo.create(&AtomDraft::note("gone soon")).unwrap();

    repo.soft_delete(atom.id).unwrap();
    assert!(repo.fetch(atom.id).unwrap().is_none());

    let err = repo.soft_delete(atom.id).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == atom.id));
}

#[test]
fn mutations_on_missing_atom_report_not_found() {
    let repo = repo();
    let ghost = uuid::Uuid::new_v4();
    assert!(matches!(
        repo.update_content(ghost, "x").unwrap_err(),
        RepoError::NotFound(_)
    ));
    assert!(matches!(
        repo.set_tags(ghost, &[]).unwrap_err(),
        RepoError::NotFound(_)
    ));
}

#[test]
fn list_by_tag_filters_and_orders_by_recency() {
    let repo = repo();
    let a = repo
        .create(&AtomDraft {
            tags: vec!["work".into()],
            ..AtomDraft::note("first")
        })
        .unwrap();
    let _b = repo
        .create(&AtomDraft {
            tags: vec!["home".into()],
            ..AtomDraft::note("second")
        })
        .unwrap();
    let c = repo
        .create(&AtomDraft {
            tags: vec!["work".into()],
            ..AtomDraft::note("third")
        })
        .unwrap();

    // Bump `a` so it becomes the most recently updated work atom. The sleep
    // keeps the millisecond timestamps strictly ordered.
    std::thread::sleep(std::time::Duration::from_millis(5));
    repo.update_content(a.id, "first, revised").unwrap();

    let work = repo.list_by_tag(Some("Work"), 10, 0).unwrap();
    let ids: Vec<_> = work.iter().map(|atom| atom.id).collect();
    assert!(ids.contains(&a.id) && ids.contains(&c.id));
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], a.id);

    let all = repo.list_by_tag(None, 10, 0).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn list_by_tag_excludes_deleted_atoms() {
    let repo = repo();
    let atom = repo
        .create(&AtomDraft {
            tags: vec!["work".into()],
            ..AtomDraft::note("doomed")
        })
        .unwrap();
    repo.soft_delete(atom.id).unwrap();
    assert!(repo.list_by_tag(Some("work"), 10, 0).unwrap().is_empty());
}

#[test]
fn time_range_overlap_boundaries() {
    let repo = repo();
    let inside = repo
        .create(&AtomDraft::event("inside", 120, Some(180)))
        .unwrap();
    let spanning = repo
        .create(&AtomDraft::event("spans range", 50, Some(150)))
        .unwrap();
    let _after = repo
        .create(&AtomDraft::event("after", 200, Some(300)))
        .unwrap();
    let _before = repo
        .create(&AtomDraft::event("ends at start", 10, Some(100)))
        .unwrap();
    let _untimed = repo.create(&AtomDraft::note("no window")).unwrap();

    let hits = repo.list_by_time_range(100, 200, 10, 0).unwrap();
    let ids: Vec<_> = hits.iter().map(|atom| atom.id).collect();
    assert_eq!(ids, vec![spanning.id, inside.id]);
}

#[test]
fn point_events_match_when_instant_is_inside_range() {
    let repo = repo();
    let at_start = repo.create(&AtomDraft::event("at start", 100, None)).unwrap();
    let _at_end = repo.create(&AtomDraft::event("at end", 200, None)).unwrap();
    let inside = repo.create(&AtomDraft::event("inside", 150, None)).unwrap();

    let hits = repo.list_by_time_range(100, 200, 10, 0).unwrap();
    let ids: Vec<_> = hits.iter().map(|atom| atom.id).collect();
    assert_eq!(ids, vec![at_start.id, inside.id]);
}

#[test]
fn time_range_rejects_reversed_range() {
    let repo = repo();
    let err = repo.list_by_time_range(200, 100, 10, 0).unwrap_err();
    assert!(matches!(
        err,
        RepoError::InvalidRange {
            start: 200,
            end: 100
        }
    ));
}

#[test]
fn list_limit_is_clamped_and_defaulted() {
    let repo = repo();
    for i in 0..60 {
        repo.create(&AtomDraft::note(format!("note {i}"))).unwrap();
    }
    // limit 0 falls back to the default page size of 50
    assert_eq!(repo.list_by_tag(None, 0, 0).unwrap().len(), 50);
    // offsets page through the rest
    assert_eq!(repo.list_by_tag(None, 50, 50).unwrap().len(), 10);
}

#[test]
fn list_tags_reflects_active_atoms_only() {
    let repo = repo();
    let keep = repo
        .create(&AtomDraft {
            tags: vec!["beta".into()],
            ..AtomDraft::note("keep")
        })
        .unwrap();
    let drop = repo
        .create(&AtomDraft {
            tags: vec!["alpha".into()],
            ..AtomDraft::note("drop")
        })
        .unwrap();

    assert_eq!(repo.list_tags().unwrap(), vec!["alpha", "beta"]);

    repo.soft_delete(drop.id).unwrap();
    assert_eq!(repo.list_tags().unwrap(), vec!["beta"]);

    repo.soft_delete(keep.id).unwrap();
    assert!(repo.list_tags().unwrap().is_empty());
}
