//! Organisation directory
//!
//! The accounts, departments and groups the business handlers read. The
//! server keeps them in memory, optionally seeded from a JSON file:
//!
//! ```json
//! {
//!   "departments": [{"department_id": "d1", "name": "Eng", "sort_order": 1}],
//!   "employees": [{"employee_id": "e1", "name": "Ada", "department_id": "d1"}],
//!   "groups": [{"group_id": "g1", "name": "core", "creator_employee_id": "e1",
//!               "members": ["e1"]}]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::envelope::iso_now;
use crate::utils::error::StoreError;

pub const STATUS_ACTIVE: &str = "active";

fn active() -> String {
    STATUS_ACTIVE.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Employee {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub is_ai_agent: bool,
    #[serde(default)]
    pub skills_badge: Option<Value>,
    #[serde(default = "active")]
    pub status: String,
}

impl Employee {
    pub fn new(employee_id: &str, name: &str) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            name: name.to_string(),
            department_id: None,
            manager_id: None,
            is_ai_agent: false,
            skills_badge: None,
            status: active(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub department_id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub creator_employee_id: String,
    #[serde(default = "iso_now")]
    pub created_at: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Group {
    pub fn has_member(&self, employee_id: &str) -> bool {
        self.members.iter().any(|m| m == employee_id)
    }
}

/// Serialized form of a directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DirectorySeed {
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// Read access to the organisation, as the handlers need it.
pub trait Directory: Send + Sync {
    /// An employee with `active` status.
    fn active_employee(&self, employee_id: &str) -> Option<Employee>;

    /// All active employees, ordered by id.
    fn active_employees(&self) -> Vec<Employee>;

    /// Departments ordered by `sort_order`, then id.
    fn departments(&self) -> Vec<Department>;

    fn group(&self, group_id: &str) -> Option<Group>;

    /// Groups, newest first. `member` narrows to groups containing them.
    fn groups(&self, member: Option<&str>) -> Vec<Group>;
}

#[derive(Debug, Default)]
struct Tables {
    employees: BTreeMap<String, Employee>,
    departments: BTreeMap<String, Department>,
    groups: BTreeMap<String, Group>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let directory = Self::new();
        {
            let mut tables = directory.write();
            for d in seed.departments {
                tables.departments.insert(d.department_id.clone(), d);
            }
            for e in seed.employees {
                tables.employees.insert(e.employee_id.clone(), e);
            }
            for g in seed.groups {
                tables.groups.insert(g.group_id.clone(), g);
            }
        }
        directory
    }

    /// Load a JSON seed file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read(path)?;
        let seed: DirectorySeed = serde_json::from_slice(&raw)?;
        Ok(Self::from_seed(seed))
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn upsert_employee(&self, employee: Employee) {
        self.write()
            .employees
            .insert(employee.employee_id.clone(), employee);
    }

    pub fn upsert_department(&self, department: Department) {
        self.write()
            .departments
            .insert(department.department_id.clone(), department);
    }

    pub fn upsert_group(&self, group: Group) {
        self.write().groups.insert(group.group_id.clone(), group);
    }

    pub fn seed(&self) -> DirectorySeed {
        let tables = self.read();
        DirectorySeed {
            departments: tables.departments.values().cloned().collect(),
            employees: tables.employees.values().cloned().collect(),
            groups: tables.groups.values().cloned().collect(),
        }
    }
}

impl Directory for MemoryDirectory {
    fn active_employee(&self, employee_id: &str) -> Option<Employee> {
        self.read()
            .employees
            .get(employee_id)
            .filter(|e| e.is_active())
            .cloned()
    }

    fn active_employees(&self) -> Vec<Employee> {
        self.read()
            .employees
            .values()
            .filter(|e| e.is_active())
            .cloned()
            .collect()
    }

    fn departments(&self) -> Vec<Department> {
        let mut departments: Vec<Department> =
            self.read().departments.values().cloned().collect();
        departments.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.department_id.cmp(&b.department_id))
        });
        departments
    }

    fn group(&self, group_id: &str) -> Option<Group> {
        self.read().groups.get(group_id).cloned()
    }

    fn groups(&self, member: Option<&str>) -> Vec<Group> {
        let mut groups: Vec<Group> = self
            .read()
            .groups
            .values()
            .filter(|g| member.is_none_or(|m| g.has_member(m)))
            .cloned()
            .collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        groups
    }
}
