use seishin_core::model::{
    CutFilter, CutPatch, NewCut, NewQuickLink, NewStudio, QuickLinkType, Step, WorkType,
};
use seishin_core::{Error, Store, Table};
use tempfile::TempDir;

async fn open(temp: &TempDir) -> Store {
    Store::open(&temp.path().join("seishin.sqlite")).await.unwrap()
}

#[tokio::test]
async fn retake_bookkeeping_follows_the_step_machine() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let cut = store.add_cut(NewCut::new("Project X", 1, "C001")).await.unwrap();
    assert_eq!(cut.step, Step::Received);
    assert_eq!(cut.retake_count, 0);

    store.advance_cut_step(cut.id, Step::Working, None).await.unwrap();
    store.advance_cut_step(cut.id, Step::Submitted, None).await.unwrap();
    let retake = store
        .advance_cut_step(cut.id, Step::Retake, Some("hands are off-model"))
        .await
        .unwrap();
    assert_eq!(retake.retake_count, 1);

    let history = store.retake_history(cut.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_open());
    assert_eq!(history[0].reason.as_deref(), Some("hands are off-model"));

    store.advance_cut_step(cut.id, Step::Working, None).await.unwrap();
    let history = store.retake_history(cut.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].resolved_at.is_some());

    store.advance_cut_step(cut.id, Step::Submitted, None).await.unwrap();
    store.advance_cut_step(cut.id, Step::Retake, None).await.unwrap();
    store.advance_cut_step(cut.id, Step::Working, None).await.unwrap();
    store.advance_cut_step(cut.id, Step::Submitted, None).await.unwrap();
    let done = store.advance_cut_step(cut.id, Step::Done, None).await.unwrap();
    assert_eq!(done.retake_count, 2);
    assert!(done.completed_at.is_some());

    let history = store.retake_history(cut.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| !h.is_open()));
    assert!(history[0].returned_at >= history[1].returned_at);

    let reloaded = store.get_cut(cut.id).await.unwrap().unwrap();
    assert_eq!(reloaded, done);
    store.close().await;
}

#[tokio::test]
async fn invalid_transitions_are_rejected_without_changes() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let cut = store.add_cut(NewCut::new("P", 1, "C001")).await.unwrap();

    let err = store
        .advance_cut_step(cut.id, Step::Done, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "{err}");
    assert_eq!(store.get_cut(cut.id).await.unwrap().unwrap(), cut);

    let err = store
        .advance_cut_step(999, Step::Working, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "cut", .. }));
    store.close().await;
}

#[tokio::test]
async fn deleting_a_cut_removes_its_history() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let mut new = NewCut::new("P", 1, "C001");
    new.step = Step::Submitted;
    let cut = store.add_cut(new).await.unwrap();
    store.advance_cut_step(cut.id, Step::Retake, None).await.unwrap();
    assert_eq!(store.list_retake_history().await.unwrap().len(), 1);

    assert!(store.delete_cut(cut.id).await.unwrap());
    assert!(store.list_retake_history().await.unwrap().is_empty());
    assert!(!store.delete_cut(cut.id).await.unwrap());
    store.close().await;
}

#[tokio::test]
async fn cut_list_sorts_by_attention_then_number() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;

    for (number, step) in [
        ("C003", Step::Done),
        ("C002", Step::Received),
        ("C001", Step::Received),
        ("C004", Step::Working),
    ] {
        let mut new = NewCut::new("Alpha", 1, number);
        new.step = step;
        store.add_cut(new).await.unwrap();
    }
    let mut other = NewCut::new("Beta", 2, "C100");
    other.work_type = WorkType::Douga;
    store.add_cut(other).await.unwrap();

    let all = store.list_cuts(&CutFilter::default()).await.unwrap();
    let order: Vec<&str> = all.iter().map(|c| c.cut_number.as_str()).collect();
    assert_eq!(order, vec!["C004", "C001", "C002", "C100", "C003"]);

    let alpha_received = store
        .list_cuts(&CutFilter {
            project_name: Some("Alpha".to_string()),
            step: Some(Step::Received),
            ..CutFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(alpha_received.len(), 2);

    let douga = store
        .list_cuts(&CutFilter {
            work_type: Some(WorkType::Douga),
            ..CutFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(douga.len(), 1);

    assert_eq!(store.list_projects().await.unwrap(), vec!["Alpha", "Beta"]);

    let done = all.iter().find(|c| c.step == Step::Done).unwrap();
    assert!(done.completed_at.is_some());
    store.close().await;
}

#[tokio::test]
async fn update_cut_patches_fields_only() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let cut = store.add_cut(NewCut::new("P", 1, "C001")).await.unwrap();

    let updated = store
        .update_cut(
            cut.id,
            CutPatch {
                price_per_cut: Some(4500),
                scene_number: Some(Some("S12".to_string())),
                notes: Some("layout approved".to_string()),
                ..CutPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.price_per_cut, 4500);
    assert_eq!(updated.scene_number.as_deref(), Some("S12"));
    assert_eq!(updated.step, Step::Received);
    assert_eq!(updated.created_at, cut.created_at);
    assert!(updated.updated_at >= cut.updated_at);
    assert_eq!(store.get_cut(cut.id).await.unwrap().unwrap(), updated);
    store.close().await;
}

#[tokio::test]
async fn studio_stats_count_retakes_per_cut() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let studio = store
        .add_studio(NewStudio {
            name: "Studio A".to_string(),
            short_name: "A".to_string(),
            default_price_per_cut: 4500,
            ..NewStudio::default()
        })
        .await
        .unwrap();
    let idle = store
        .add_studio(NewStudio {
            name: "Studio B".to_string(),
            ..NewStudio::default()
        })
        .await
        .unwrap();

    for number in ["C001", "C002"] {
        let mut new = NewCut::new("P", 1, number);
        new.studio_id = Some(studio.id);
        new.step = Step::Submitted;
        let cut = store.add_cut(new).await.unwrap();
        if number == "C001" {
            store.advance_cut_step(cut.id, Step::Retake, None).await.unwrap();
        }
    }

    let stats = store.studios_with_stats().await.unwrap();
    assert_eq!(stats.len(), 2);
    let a = stats.iter().find(|s| s.studio.id == studio.id).unwrap();
    assert_eq!(a.total_cuts, 2);
    assert_eq!(a.total_retakes, 1);
    assert_eq!(a.retake_rate, 0.5);
    let b = stats.iter().find(|s| s.studio.id == idle.id).unwrap();
    assert_eq!(b.total_cuts, 0);
    assert_eq!(b.retake_rate, 0.0);

    // Cuts keep pointing at a deleted studio.
    assert!(store.delete_studio(studio.id).await.unwrap());
    let cuts = store.list_cuts(&CutFilter::default()).await.unwrap();
    assert!(cuts.iter().all(|c| c.studio_id == Some(studio.id)));
    store.close().await;
}

#[tokio::test]
async fn quick_links_append_swap_and_keep_gaps() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;

    let mut ids = Vec::new();
    for (label, value) in [
        ("site", "https://studio.example"),
        ("desk", "03-1234-5678"),
        ("mail", "desk@studio.example"),
    ] {
        let link = store
            .add_quick_link(NewQuickLink {
                label: label.to_string(),
                value: value.to_string(),
                link_type: seishin_core::model::detect_link_type(value),
            })
            .await
            .unwrap();
        ids.push(link.id);
    }
    let links = store.list_quick_links().await.unwrap();
    assert_eq!(
        links.iter().map(|l| l.order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(links[1].link_type, QuickLinkType::Tel);

    store.swap_quick_links(ids[0], ids[2]).await.unwrap();
    let labels: Vec<String> = store
        .list_quick_links()
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.label)
        .collect();
    assert_eq!(labels, vec!["mail", "desk", "site"]);

    assert!(store.delete_quick_link(ids[1]).await.unwrap());
    let orders: Vec<i64> = store
        .list_quick_links()
        .await
        .unwrap()
        .iter()
        .map(|l| l.order)
        .collect();
    assert_eq!(orders, vec![0, 2]);

    // Appending after a delete reuses the count, so orders may collide.
    let extra = store
        .add_quick_link(NewQuickLink {
            label: "chat".to_string(),
            value: "Slack #genga".to_string(),
            link_type: QuickLinkType::Other,
        })
        .await
        .unwrap();
    assert_eq!(extra.order, 2);

    let err = store.swap_quick_links(ids[0], 999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    store.close().await;
}

#[tokio::test]
async fn settings_and_passphrase_helpers() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;

    assert_eq!(store.saved_passphrase().await.unwrap(), None);
    store.save_passphrase("").await.unwrap();
    assert_eq!(store.saved_passphrase().await.unwrap(), None);
    store.save_passphrase("hunter2").await.unwrap();
    assert_eq!(store.saved_passphrase().await.unwrap().as_deref(), Some("hunter2"));

    assert_eq!(store.monthly_target().await.unwrap(), 0);
    store.set_monthly_target(300_000).await.unwrap();
    assert_eq!(store.monthly_target().await.unwrap(), 300_000);

    store.set_setting("theme", "dark").await.unwrap();
    store.set_setting("theme", "light").await.unwrap();
    assert_eq!(store.get_setting("theme").await.unwrap().as_deref(), Some("light"));
    assert!(store.delete_setting("theme").await.unwrap());
    assert_eq!(store.get_setting("theme").await.unwrap(), None);
    assert_eq!(store.list_settings().await.unwrap().len(), 2);
    store.close().await;
}

#[tokio::test]
async fn mutations_publish_change_notifications() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp).await;
    let mut changes = store.subscribe();

    let mut new = NewCut::new("P", 1, "C001");
    new.step = Step::Submitted;
    let cut = store.add_cut(new).await.unwrap();
    assert_eq!(changes.recv().await.unwrap().table, Table::Cuts);

    store.advance_cut_step(cut.id, Step::Retake, None).await.unwrap();
    assert_eq!(changes.recv().await.unwrap().table, Table::Cuts);
    assert_eq!(changes.recv().await.unwrap().table, Table::RetakeHistory);

    store.set_setting("k", "v").await.unwrap();
    assert_eq!(changes.recv().await.unwrap().table, Table::Settings);
    store.close().await;
}
