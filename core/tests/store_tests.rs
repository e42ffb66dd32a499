use shardex_core::persist::{DataPaths, NodeDb};
use shardex_core::store::{OccurrenceStore, PageStore, RepairJobStore};
use shardex_core::{make_occurrences, Occurrence, Page, PageId, RepairJob, RepairJobStatus};
use tempfile::tempdir;
use time::OffsetDateTime;

fn occ(page: &str, freq: u32) -> Occurrence {
    Occurrence { page_id: PageId::new(page), frequency: freq, positions: (0..freq).collect() }
}

#[test]
fn pages_survive_reopen() {
    let dir = tempdir().unwrap();
    let paths = DataPaths::new(dir.path());
    let mut page = Page::new(PageId::new("p1"), "https://example.com/");
    page.title = "Example".into();
    page.last_indexed_at = Some(OffsetDateTime::from_unix_timestamp(42).unwrap());

    {
        let db = NodeDb::open(&paths).unwrap();
        db.pages().unwrap().save(&page).unwrap();
        db.flush().unwrap();
    }

    let db = NodeDb::open(&paths).unwrap();
    let pages = db.pages().unwrap();
    assert_eq!(pages.get(&page.id).unwrap(), page);
    assert_eq!(pages.count().unwrap(), 1);
    assert!(pages.get(&PageId::new("missing")).unwrap_err().is_not_found());
}

#[test]
fn sled_removal_cascades_like_memory() {
    let dir = tempdir().unwrap();
    let db = NodeDb::open(&DataPaths::new(dir.path())).unwrap();
    let store = db.occurrences().unwrap();

    store.add("shared", occ("p1", 1)).unwrap();
    store.add("shared", occ("p2", 2)).unwrap();
    store.add("unique", occ("p1", 1)).unwrap();
    assert_eq!(store.get_for_page(&PageId::new("p1")).unwrap().len(), 2);

    store.remove_for_page(&PageId::new("p1")).unwrap();

    assert!(store.get_all("unique").unwrap_err().is_not_found());
    assert_eq!(store.get_all("shared").unwrap(), vec![occ("p2", 2)]);
    assert!(store.get_for_page(&PageId::new("p1")).unwrap().is_empty());
    assert_eq!(store.keyword_count().unwrap(), 1);
}

#[test]
fn sled_replace_swaps_the_whole_set() {
    let dir = tempdir().unwrap();
    let db = NodeDb::open(&DataPaths::new(dir.path())).unwrap();
    let store = db.occurrences().unwrap();
    let p1 = PageId::new("p1");
    store.add("shared", occ("p2", 2)).unwrap();
    store.replace_for_page(&p1, &make_occurrences(&p1, &["old".to_string(), "shared".to_string()])).unwrap();

    let mut next = make_occurrences(&p1, &["new".to_string(), "shared".to_string(), "shared".to_string()]);
    next.insert("empty".into(), occ("p1", 0));
    store.replace_for_page(&p1, &next).unwrap();

    assert!(store.get_all("old").unwrap_err().is_not_found());
    assert!(store.get_all("empty").unwrap_err().is_not_found());
    let shared = store.get_all("shared").unwrap();
    assert_eq!(shared.len(), 2);
    assert_eq!(shared.iter().find(|o| o.page_id == p1).unwrap().frequency, 2);
    let keywords: Vec<String> = store.get_for_page(&p1).unwrap().into_keys().collect();
    assert_eq!(keywords, vec!["new", "shared"]);
}

#[test]
fn removing_unknown_page_is_a_no_op() {
    let dir = tempdir().unwrap();
    let db = NodeDb::open(&DataPaths::new(dir.path())).unwrap();
    let store = db.occurrences().unwrap();
    store.add("kept", occ("p2", 1)).unwrap();
    store.remove_for_page(&PageId::new("nobody")).unwrap();
    assert_eq!(store.get_all("kept").unwrap().len(), 1);
}

#[test]
fn repair_jobs_are_listed_by_status() {
    let dir = tempdir().unwrap();
    let db = NodeDb::open(&DataPaths::new(dir.path())).unwrap();
    let jobs = db.repair_jobs().unwrap();

    jobs.save(&RepairJob::pending(PageId::new("a"))).unwrap();
    let mut failed = RepairJob::pending(PageId::new("b"));
    failed.transition(RepairJobStatus::Failed);
    jobs.save(&failed).unwrap();

    let pending = jobs.list_by_status(RepairJobStatus::Pending).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].page_id, PageId::new("a"));
    assert_eq!(jobs.get(&PageId::new("b")).unwrap().status, RepairJobStatus::Failed);
    assert!(jobs.get(&PageId::new("c")).unwrap_err().is_not_found());
}
