use super::*;
use serde_json::json;
use std::io::Write;
use tempfile::{NamedTempFile, tempdir};

#[test]
fn test_bind_and_lookup() {
    let dir = tempdir().unwrap();
    let store = SessionStore::open(dir.path().to_str().unwrap()).unwrap();

    assert_eq!(store.lookup("c1").unwrap(), None);
    let binding = store.bind("c1", "e1", Some("android")).unwrap();
    assert_eq!(binding.account_id, "e1");
    assert_eq!(store.lookup("c1").unwrap(), Some("e1".to_string()));
    assert_eq!(
        store.binding("c1").unwrap().unwrap().device_info.as_deref(),
        Some("android")
    );
}

#[test]
fn test_last_bind_wins() {
    let store = SessionStore::temporary().unwrap();
    store.bind("c1", "e1", None).unwrap();
    store.bind("c1", "e2", Some("web")).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.lookup("c1").unwrap(), Some("e2".to_string()));
}

#[test]
fn test_revoke_removes_binding() {
    let store = SessionStore::temporary().unwrap();
    store.bind("c1", "e1", None).unwrap();

    assert!(store.revoke("c1").unwrap());
    assert!(!store.revoke("c1").unwrap());
    assert_eq!(store.lookup("c1").unwrap(), None);
    assert!(store.is_empty());
}

#[test]
fn test_bindings_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    {
        let store = SessionStore::open(&path).unwrap();
        store.bind("c1", "e1", None).unwrap();
        store.bind("c2", "e2", None).unwrap();
        store.flush().unwrap();
    }

    let store = SessionStore::open(&path).unwrap();
    let clients: Vec<String> = store.bindings().into_iter().map(|b| b.client_id).collect();
    assert_eq!(clients, vec!["c1".to_string(), "c2".to_string()]);
}

fn sample() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.upsert_department(Department {
        department_id: "d2".to_string(),
        name: "Ops".to_string(),
        parent_id: None,
        sort_order: 1,
    });
    directory.upsert_department(Department {
        department_id: "d1".to_string(),
        name: "Eng".to_string(),
        parent_id: None,
        sort_order: 1,
    });
    directory.upsert_department(Department {
        department_id: "d0".to_string(),
        name: "Board".to_string(),
        parent_id: None,
        sort_order: 5,
    });
    directory.upsert_employee(Employee::new("e1", "Ada"));
    let mut gone = Employee::new("e9", "Gone");
    gone.status = "disabled".to_string();
    directory.upsert_employee(gone);
    directory
}

#[test]
fn test_departments_ordered_by_sort_order_then_id() {
    let ids: Vec<String> = sample()
        .departments()
        .into_iter()
        .map(|d| d.department_id)
        .collect();
    assert_eq!(ids, vec!["d1", "d2", "d0"]);
}

#[test]
fn test_inactive_employees_are_hidden() {
    let directory = sample();
    assert!(directory.active_employee("e1").is_some());
    assert!(directory.active_employee("e9").is_none());
    assert_eq!(directory.active_employees().len(), 1);
}

#[test]
fn test_groups_filtered_by_member_newest_first() {
    let directory = MemoryDirectory::new();
    for (id, created, members) in [
        ("g1", "2026-01-01T00:00:00.000Z", vec!["e1", "e2"]),
        ("g2", "2026-02-01T00:00:00.000Z", vec!["e1"]),
        ("g3", "2026-03-01T00:00:00.000Z", vec!["e2"]),
    ] {
        directory.upsert_group(Group {
            group_id: id.to_string(),
            name: id.to_string(),
            creator_employee_id: members[0].to_string(),
            created_at: created.to_string(),
            members: members.into_iter().map(str::to_string).collect(),
        });
    }

    let mine: Vec<String> = directory
        .groups(Some("e1"))
        .into_iter()
        .map(|g| g.group_id)
        .collect();
    assert_eq!(mine, vec!["g2", "g1"]);
    assert_eq!(directory.groups(None).len(), 3);
    assert!(directory.group("g3").unwrap().has_member("e2"));
}

#[test]
fn test_load_seed_file() {
    let mut file = NamedTempFile::new().unwrap();
    let seed = json!({
        "departments": [{"department_id": "d1", "name": "Eng"}],
        "employees": [
            {"employee_id": "e1", "name": "Ada", "department_id": "d1"},
            {"employee_id": "e2", "name": "Bot", "is_ai_agent": true, "skills_badge": ["rust"]}
        ],
        "groups": [{"group_id": "g1", "name": "core", "creator_employee_id": "e1", "members": ["e1", "e2"]}]
    });
    file.write_all(seed.to_string().as_bytes()).unwrap();

    let directory = MemoryDirectory::load(file.path()).unwrap();
    let bot = directory.active_employee("e2").unwrap();
    assert!(bot.is_ai_agent);
    assert_eq!(bot.skills_badge, Some(json!(["rust"])));
    assert_eq!(directory.departments()[0].sort_order, 0);
    assert!(!directory.group("g1").unwrap().created_at.is_empty());
    assert_eq!(directory.seed().employees.len(), 2);
}

#[test]
fn test_load_missing_seed_file_fails() {
    let dir = tempdir().unwrap();
    let err = MemoryDirectory::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, crate::utils::error::StoreError::Io(_)));
}
