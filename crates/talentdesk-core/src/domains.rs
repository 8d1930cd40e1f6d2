//! Built-in domain schemas and seed fixtures for the admin resources.
//!
//! Each schema is configuration, not code: additional resources can be
//! registered at runtime from the same JSON shape via
//! [`DomainSchema::from_json`].

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::{DerivedRule, DerivedSpec, DomainSchema, FieldSpec, StatusFlow};

const DEPARTMENTS: &[&str] = &["Engineering", "Sales", "HR", "Finance", "Operations"];

fn flow(
    initial: &str,
    transitions: &[(&str, &[&str])],
    reason_required: &[&str],
    reason_field: &str,
) -> StatusFlow {
    let mut table = BTreeMap::new();
    for (from, targets) in transitions {
        table.insert(
            (*from).to_string(),
            targets.iter().map(ToString::to_string).collect(),
        );
    }
    StatusFlow {
        field: "status".to_string(),
        initial: initial.to_string(),
        transitions: table,
        reason_required: reason_required.iter().map(ToString::to_string).collect(),
        reason_field: reason_field.to_string(),
    }
}

fn ratio(name: &str, numerator: &str, denominator: &str) -> DerivedSpec {
    DerivedSpec {
        name: name.to_string(),
        rule: DerivedRule::RatioPercent {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        },
    }
}

fn leave_requests() -> DomainSchema {
    DomainSchema {
        resource: "leave_requests".to_string(),
        fields: vec![
            FieldSpec::text("employee").required().searchable(),
            FieldSpec::enumeration("department", DEPARTMENTS).filterable(),
            FieldSpec::enumeration("leave_type", &["vacation", "sick", "personal", "unpaid"])
                .filterable(),
            FieldSpec::date("from_date").required(),
            FieldSpec::date("to_date").required(),
            FieldSpec::number("days").required().aggregate(),
            FieldSpec::number("allocated"),
            FieldSpec::number("used"),
            FieldSpec::text("reason").searchable(),
            FieldSpec::text("review_note"),
            FieldSpec::enumeration("status", &["pending", "approved", "rejected", "cancelled"])
                .filterable(),
        ],
        derived: vec![DerivedSpec {
            name: "remaining".to_string(),
            rule: DerivedRule::Difference {
                minuend: "allocated".to_string(),
                subtrahend: "used".to_string(),
            },
        }],
        status_flow: Some(flow(
            "pending",
            &[
                ("pending", &["approved", "rejected", "cancelled"]),
                ("approved", &["cancelled"]),
            ],
            &["rejected"],
            "review_note",
        )),
    }
}

fn documents() -> DomainSchema {
    DomainSchema {
        resource: "documents".to_string(),
        fields: vec![
            FieldSpec::text("title").required().searchable(),
            FieldSpec::enumeration("category", &["policy", "contract", "certificate", "report"])
                .filterable(),
            FieldSpec::text("owner").searchable(),
            FieldSpec::date("uploaded_at"),
            FieldSpec::number("size_kb").aggregate(),
            FieldSpec::text("review_note"),
            FieldSpec::enumeration("status", &["pending", "approved", "rejected"]).filterable(),
        ],
        derived: Vec::new(),
        status_flow: Some(flow(
            "pending",
            &[("pending", &["approved", "rejected"])],
            &["rejected"],
            "review_note",
        )),
    }
}

fn job_postings() -> DomainSchema {
    DomainSchema {
        resource: "job_postings".to_string(),
        fields: vec![
            FieldSpec::text("title").required().searchable(),
            FieldSpec::enumeration("department", DEPARTMENTS).filterable(),
            FieldSpec::text("location").filterable().searchable(),
            FieldSpec::enumeration("employment_type", &["full_time", "part_time", "contract"])
                .filterable(),
            FieldSpec::number("openings").aggregate(),
            FieldSpec::number("applicants").aggregate(),
            FieldSpec::date("posted_at"),
            FieldSpec::enumeration("status", &["draft", "published", "closed"]).filterable(),
        ],
        derived: Vec::new(),
        status_flow: Some(flow(
            "draft",
            &[("draft", &["published"]), ("published", &["closed"])],
            &[],
            "",
        )),
    }
}

fn skills() -> DomainSchema {
    DomainSchema {
        resource: "skills".to_string(),
        fields: vec![
            FieldSpec::text("employee").required().searchable(),
            FieldSpec::text("skill").required().searchable(),
            FieldSpec::enumeration("category", &["technical", "leadership", "communication"])
                .filterable(),
            FieldSpec::enumeration(
                "level",
                &["beginner", "intermediate", "advanced", "expert"],
            )
            .filterable(),
            FieldSpec::number("progress").aggregate(),
            FieldSpec::date("last_assessed"),
        ],
        derived: Vec::new(),
        status_flow: None,
    }
}

fn enrollments() -> DomainSchema {
    DomainSchema {
        resource: "enrollments".to_string(),
        fields: vec![
            FieldSpec::text("employee").required().searchable(),
            FieldSpec::text("course").required().searchable(),
            FieldSpec::enumeration("category", &["technical", "compliance", "soft_skills"])
                .filterable(),
            FieldSpec::number("modules_total").required(),
            FieldSpec::number("modules_completed"),
            FieldSpec::date("enrolled_at"),
            FieldSpec::enumeration(
                "status",
                &["enrolled", "in_progress", "completed", "dropped"],
            )
            .filterable(),
        ],
        derived: vec![ratio(
            "completion_rate",
            "modules_completed",
            "modules_total",
        )],
        status_flow: Some(flow(
            "enrolled",
            &[
                ("enrolled", &["in_progress", "dropped"]),
                ("in_progress", &["completed", "dropped"]),
            ],
            &[],
            "",
        )),
    }
}

fn feedback() -> DomainSchema {
    DomainSchema {
        resource: "feedback".to_string(),
        fields: vec![
            FieldSpec::text("author").searchable(),
            FieldSpec::text("subject").required().searchable(),
            FieldSpec::enumeration("audience", &["trainer", "course", "platform"]).filterable(),
            FieldSpec::number("rating").aggregate(),
            FieldSpec::text("comment").searchable(),
            FieldSpec::text("resolution_note"),
            FieldSpec::enumeration("status", &["open", "acknowledged", "resolved"]).filterable(),
        ],
        derived: Vec::new(),
        status_flow: Some(flow(
            "open",
            &[
                ("open", &["acknowledged", "resolved"]),
                ("acknowledged", &["resolved"]),
            ],
            &[],
            "",
        )),
    }
}

fn certification_tests() -> DomainSchema {
    DomainSchema {
        resource: "certification_tests".to_string(),
        fields: vec![
            FieldSpec::text("candidate").required().searchable(),
            FieldSpec::text("certification").required().searchable(),
            FieldSpec::number("questions_total").required(),
            FieldSpec::number("questions_correct"),
            FieldSpec::number("passing_score"),
            FieldSpec::date("scheduled_for"),
            FieldSpec::enumeration(
                "status",
                &["scheduled", "in_progress", "passed", "failed"],
            )
            .filterable(),
        ],
        derived: vec![ratio("score", "questions_correct", "questions_total")],
        status_flow: Some(flow(
            "scheduled",
            &[
                ("scheduled", &["in_progress"]),
                ("in_progress", &["passed", "failed"]),
            ],
            &[],
            "",
        )),
    }
}

fn mentorships() -> DomainSchema {
    DomainSchema {
        resource: "mentorships".to_string(),
        fields: vec![
            FieldSpec::text("mentor").required().searchable(),
            FieldSpec::text("mentee").required().searchable(),
            FieldSpec::enumeration(
                "focus_area",
                &["career_growth", "technical", "leadership"],
            )
            .filterable(),
            FieldSpec::number("sessions_planned").required(),
            FieldSpec::number("sessions_held"),
            FieldSpec::date("started_at"),
            FieldSpec::enumeration("status", &["active", "paused", "completed"]).filterable(),
        ],
        derived: vec![ratio("progress", "sessions_held", "sessions_planned")],
        status_flow: Some(flow(
            "active",
            &[
                ("active", &["paused", "completed"]),
                ("paused", &["active", "completed"]),
            ],
            &[],
            "",
        )),
    }
}

/// All built-in domain schemas, in registration order.
#[must_use]
pub fn builtin_schemas() -> Vec<DomainSchema> {
    vec![
        leave_requests(),
        documents(),
        job_postings(),
        skills(),
        enrollments(),
        feedback(),
        certification_tests(),
        mentorships(),
    ]
}

/// Looks up one built-in schema by resource name.
#[must_use]
pub fn schema_for(resource: &str) -> Option<DomainSchema> {
    builtin_schemas()
        .into_iter()
        .find(|schema| schema.resource == resource)
}

fn objects(values: Vec<Value>) -> Vec<Map<String, Value>> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Seed fixtures for one resource, ready to be inserted into a record store.
/// Derived fields are not yet computed; run [`crate::derive_fields`] before
/// insert.
#[must_use]
pub fn fixture_records(resource: &str) -> Vec<Map<String, Value>> {
    match resource {
        "leave_requests" => objects(vec![
            json!({"employee": "John Doe", "department": "Engineering", "leave_type": "vacation",
                   "from_date": "2026-08-10", "to_date": "2026-08-14", "days": 5,
                   "allocated": 25, "used": 8, "reason": "Summer vacation", "status": "pending"}),
            json!({"employee": "Maria Garcia", "department": "Sales", "leave_type": "sick",
                   "from_date": "2026-08-03", "to_date": "2026-08-04", "days": 2,
                   "allocated": 25, "used": 12, "reason": "Medical appointment", "status": "approved"}),
            json!({"employee": "Wei Chen", "department": "Engineering", "leave_type": "personal",
                   "from_date": "2026-09-01", "to_date": "2026-09-12", "days": 10,
                   "allocated": 25, "used": 20, "reason": "Family visit", "status": "rejected",
                   "review_note": "Insufficient remaining balance"}),
            json!({"employee": "John Smith", "department": "HR", "leave_type": "vacation",
                   "from_date": "2026-07-20", "to_date": "2026-07-22", "days": 3,
                   "allocated": 22, "used": 5, "reason": "Moving day", "status": "approved"}),
            json!({"employee": "Lena Park", "department": "Finance", "leave_type": "unpaid",
                   "from_date": "2026-10-05", "to_date": "2026-10-05", "days": 1,
                   "allocated": 20, "used": 19, "reason": "Personal errand", "status": "pending"}),
        ]),
        "documents" => objects(vec![
            json!({"title": "Remote Work Policy", "category": "policy", "owner": "HR Office",
                   "uploaded_at": "2026-06-11", "size_kb": 240, "status": "approved"}),
            json!({"title": "Vendor Contract - Acme", "category": "contract", "owner": "Procurement",
                   "uploaded_at": "2026-07-02", "size_kb": 1850, "status": "pending"}),
            json!({"title": "Q2 Training Report", "category": "report", "owner": "L&D Team",
                   "uploaded_at": "2026-07-15", "size_kb": 920, "status": "rejected",
                   "review_note": "Missing completion appendix"}),
        ]),
        "job_postings" => objects(vec![
            json!({"title": "Senior Backend Engineer", "department": "Engineering",
                   "location": "Berlin", "employment_type": "full_time", "openings": 2,
                   "applicants": 34, "posted_at": "2026-07-01", "status": "published"}),
            json!({"title": "Sales Development Rep", "department": "Sales", "location": "Remote",
                   "employment_type": "full_time", "openings": 4, "applicants": 51,
                   "posted_at": "2026-06-20", "status": "published"}),
            json!({"title": "Payroll Specialist", "department": "Finance", "location": "Madrid",
                   "employment_type": "part_time", "openings": 1, "applicants": 0,
                   "posted_at": "2026-08-15", "status": "draft"}),
        ]),
        "skills" => objects(vec![
            json!({"employee": "John Doe", "skill": "Rust", "category": "technical",
                   "level": "advanced", "progress": 80, "last_assessed": "2026-05-30"}),
            json!({"employee": "Maria Garcia", "skill": "Negotiation", "category": "communication",
                   "level": "expert", "progress": 95, "last_assessed": "2026-06-18"}),
            json!({"employee": "Wei Chen", "skill": "Team Leadership", "category": "leadership",
                   "level": "intermediate", "progress": 55, "last_assessed": "2026-04-09"}),
        ]),
        "enrollments" => objects(vec![
            json!({"employee": "John Doe", "course": "Secure Coding 101", "category": "technical",
                   "modules_total": 8, "modules_completed": 3, "enrolled_at": "2026-07-01",
                   "status": "in_progress"}),
            json!({"employee": "Lena Park", "course": "GDPR Essentials", "category": "compliance",
                   "modules_total": 5, "modules_completed": 5, "enrolled_at": "2026-05-12",
                   "status": "completed"}),
            json!({"employee": "Maria Garcia", "course": "Presentation Skills",
                   "category": "soft_skills", "modules_total": 6, "modules_completed": 0,
                   "enrolled_at": "2026-08-20", "status": "enrolled"}),
        ]),
        "feedback" => objects(vec![
            json!({"author": "John Doe", "subject": "Rust workshop pacing", "audience": "trainer",
                   "rating": 4, "comment": "Great depth, slightly fast pace", "status": "open"}),
            json!({"author": "Anonymous", "subject": "Platform search is slow", "audience": "platform",
                   "rating": 2, "comment": "Search takes seconds on the course list",
                   "status": "acknowledged"}),
            json!({"author": "Maria Garcia", "subject": "GDPR course outdated", "audience": "course",
                   "rating": 3, "comment": "Module 4 cites the old retention rules",
                   "status": "resolved", "resolution_note": "Module refreshed in July"}),
        ]),
        "certification_tests" => objects(vec![
            json!({"candidate": "Wei Chen", "certification": "Scrum Master I",
                   "questions_total": 80, "questions_correct": 68, "passing_score": 74,
                   "scheduled_for": "2026-08-01", "status": "passed"}),
            json!({"candidate": "Lena Park", "certification": "Financial Controller",
                   "questions_total": 60, "questions_correct": 0, "passing_score": 70,
                   "scheduled_for": "2026-09-10", "status": "scheduled"}),
            json!({"candidate": "John Smith", "certification": "HR Analytics",
                   "questions_total": 50, "questions_correct": 31, "passing_score": 65,
                   "scheduled_for": "2026-07-28", "status": "failed"}),
        ]),
        "mentorships" => objects(vec![
            json!({"mentor": "Maria Garcia", "mentee": "John Doe", "focus_area": "career_growth",
                   "sessions_planned": 10, "sessions_held": 4, "started_at": "2026-06-01",
                   "status": "active"}),
            json!({"mentor": "Wei Chen", "mentee": "Lena Park", "focus_area": "technical",
                   "sessions_planned": 8, "sessions_held": 8, "started_at": "2026-03-15",
                   "status": "completed"}),
            json!({"mentor": "John Smith", "mentee": "Maria Garcia", "focus_area": "leadership",
                   "sessions_planned": 6, "sessions_held": 1, "started_at": "2026-08-01",
                   "status": "paused"}),
        ]),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_document;

    #[test]
    fn every_builtin_schema_validates() {
        let schemas = builtin_schemas();
        assert_eq!(schemas.len(), 8);
        for schema in &schemas {
            if let Err(err) = schema.validate() {
                panic!("schema '{}' failed validation: {err}", schema.resource);
            }
        }
    }

    #[test]
    fn resource_names_are_unique() {
        let schemas = builtin_schemas();
        let mut names: Vec<&str> = schemas
            .iter()
            .map(|schema| schema.resource.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), schemas.len());
    }

    #[test]
    fn fixtures_conform_to_their_schemas() {
        for schema in builtin_schemas() {
            let fixtures = fixture_records(&schema.resource);
            assert!(
                !fixtures.is_empty(),
                "resource '{}' has no fixtures",
                schema.resource
            );
            for fields in fixtures {
                let issues = validate_document(&schema, &fields);
                assert!(
                    issues.is_empty(),
                    "fixture for '{}' is invalid: {:?}",
                    schema.resource,
                    issues
                );
                for name in fields.keys() {
                    assert!(
                        schema.field(name).is_some(),
                        "fixture for '{}' sets undeclared field '{name}'",
                        schema.resource
                    );
                }
            }
        }
    }

    #[test]
    fn schema_lookup_finds_known_resources_only() {
        assert!(schema_for("leave_requests").is_some());
        assert!(schema_for("payroll").is_none());
        assert!(fixture_records("payroll").is_empty());
    }
}
