//! Semantic roles of detector classes.
//!
//! The role map is built once at startup from the detector's class table and the
//! configured role assignment, then shared read-only.

use std::collections::{BTreeMap, HashMap};

use log::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassRole {
    /// The inspected object itself; its masks form the overlap denominator.
    Reference,
    /// Presence alone means top severity.
    UnconditionalDefect,
    /// Severity depends on overlap with the reference union.
    AreaDefect,
}

impl ClassRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassRole::Reference => "reference",
            ClassRole::UnconditionalDefect => "unconditional_defect",
            ClassRole::AreaDefect => "area_defect",
        }
    }
}

/// Class names per role, as configured.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleAssignment {
    pub reference: Vec<String>,
    pub unconditional_defect: Vec<String>,
    pub area_defect: Vec<String>,
    /// Optional reason label overrides keyed by class name.
    pub labels: BTreeMap<String, String>,
}

impl RoleAssignment {
    fn entries(&self) -> impl Iterator<Item = (ClassRole, &String)> {
        self.reference
            .iter()
            .map(|name| (ClassRole::Reference, name))
            .chain(
                self.unconditional_defect
                    .iter()
                    .map(|name| (ClassRole::UnconditionalDefect, name)),
            )
            .chain(self.area_defect.iter().map(|name| (ClassRole::AreaDefect, name)))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClassRoleMap {
    roles: HashMap<u32, ClassRole>,
    names: BTreeMap<u32, String>,
    labels: HashMap<u32, String>,
    missing: Vec<String>,
}

impl ClassRoleMap {
    /// Resolve configured class names against the detector's class table.
    ///
    /// Names are matched exactly first, then case-insensitively. Names the detector
    /// does not know are logged and recorded in `missing()`; they contribute nothing.
    pub fn build(class_names: &BTreeMap<u32, String>, assignment: &RoleAssignment) -> Self {
        let mut map = ClassRoleMap {
            names: class_names.clone(),
            ..Default::default()
        };

        for (role, name) in assignment.entries() {
            let Some(class_id) = lookup_class_id(class_names, name) else {
                warn!(
                    "configured {} class '{}' is not in the detector class table",
                    role.as_str(),
                    name
                );
                map.missing.push(name.clone());
                continue;
            };
            if let Some(previous) = map.roles.insert(class_id, role) {
                if previous != role {
                    warn!(
                        "class '{}' assigned to both {} and {}; using {}",
                        name,
                        previous.as_str(),
                        role.as_str(),
                        role.as_str()
                    );
                }
            }
        }

        for (class_id, class_name) in class_names {
            let label = assignment
                .labels
                .get(class_name)
                .cloned()
                .unwrap_or_else(|| default_reason_label(class_name));
            map.labels.insert(*class_id, label);
        }
        map
    }

    pub fn role_of(&self, class_id: u32) -> Option<ClassRole> {
        self.roles.get(&class_id).copied()
    }

    pub fn class_name(&self, class_id: u32) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    /// Human-readable reason label for a class.
    pub fn reason_label(&self, class_id: u32, class_name: &str) -> String {
        self.labels
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| default_reason_label(class_name))
    }

    /// Configured names that did not resolve to a detector class.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn has_role(&self, role: ClassRole) -> bool {
        self.roles.values().any(|r| *r == role)
    }
}

/// Class name with its first letter upper-cased (`rotten` → `Rotten`).
pub fn default_reason_label(class_name: &str) -> String {
    let mut chars = class_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lookup_class_id(class_names: &BTreeMap<u32, String>, name: &str) -> Option<u32> {
    class_names
        .iter()
        .find(|(_, candidate)| candidate.as_str() == name)
        .or_else(|| {
            class_names
                .iter()
                .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
        })
        .map(|(id, _)| *id)
}
