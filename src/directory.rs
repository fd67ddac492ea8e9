//! User directory — accounts, external codes, and identifier resolution.
//!
//! Connection rows store `patient_id`/`doctor_id` as opaque strings that may
//! hold either a directory id or a human-facing code (e.g. `RT-P-1234`),
//! depending on the call path that created the record. Every counterpart
//! lookup goes through [`UserRef`] + [`resolve_user`] so both representations
//! are tolerated uniformly.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::Role;

/// Attempts at drawing an unused external code before giving up.
const CODE_ATTEMPTS: u32 = 32;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub patient_code: Option<String>,
    pub doctor_code: Option<String>,
    pub domain: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The external code matching this user's role, if assigned.
    pub fn external_code(&self) -> Option<&str> {
        match self.role {
            Role::Patient => self.patient_code.as_deref(),
            Role::Doctor => self.doctor_code.as_deref(),
        }
    }
}

/// Compact public projection used when enriching connections with the
/// counterpart's details.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub code: Option<String>,
    pub domain: Option<String>,
}

impl UserSummary {
    /// Placeholder used when a connection references a user that no longer
    /// resolves (legacy rows).
    pub fn unknown(role: Role) -> Self {
        let last_name = match role {
            Role::Patient => "Patient",
            Role::Doctor => "Doctor",
        };
        Self {
            id: String::new(),
            first_name: "Unknown".into(),
            last_name: last_name.into(),
            email: String::new(),
            code: None,
            domain: None,
        }
    }
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        let code = u.external_code().map(|c| c.to_string());
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            code,
            domain: u.domain,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub domain: Option<String>,
}

/// A reference to a user as stored on a Connection row: either the directory's
/// internal id or an external-facing code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    InternalId(String),
    ExternalCode(String),
}

impl UserRef {
    /// Classify a raw identifier string. UUIDs are internal ids; anything
    /// else is treated as an external code.
    pub fn parse(raw: &str) -> Self {
        if Uuid::parse_str(raw).is_ok() {
            UserRef::InternalId(raw.to_string())
        } else {
            UserRef::ExternalCode(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserRef::InternalId(s) | UserRef::ExternalCode(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Credential helpers
// ---------------------------------------------------------------------------

fn hash_credential(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_salt() -> String {
    let bytes: [u8; 16] = rand::random();
    hex_encode(&bytes)
}

// ---------------------------------------------------------------------------
// Repository functions
// ---------------------------------------------------------------------------

/// Create a user with a fresh external code for their role.
pub fn create_user(conn: &Connection, new: &NewUser) -> Result<User, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let salt = random_salt();
    let password_hash = hash_credential(&salt, &new.password);

    let code = generate_external_code(conn, new.role)?;
    let (patient_code, doctor_code) = match new.role {
        Role::Patient => (Some(code), None),
        Role::Doctor => (None, Some(code)),
    };

    conn.execute(
        "INSERT INTO users (id, first_name, last_name, email, password_hash, password_salt,
         role, patient_code, doctor_code, domain, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
        params![
            id,
            new.first_name,
            new.last_name,
            new.email.to_lowercase(),
            password_hash,
            salt,
            new.role.as_str(),
            patient_code,
            doctor_code,
            new.domain,
            now,
        ],
    )?;

    get_user(conn, &id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "User".into(),
        id,
    })
}

/// Draw an unused `RT-P-nnnn` / `RT-D-nnnn` code.
fn generate_external_code(conn: &Connection, role: Role) -> Result<String, DatabaseError> {
    let (prefix, column) = match role {
        Role::Patient => ("RT-P", "patient_code"),
        Role::Doctor => ("RT-D", "doctor_code"),
    };

    let mut rng = rand::thread_rng();
    for _ in 0..CODE_ATTEMPTS {
        let code = format!("{prefix}-{:04}", rng.gen_range(0..10_000));
        let taken: bool = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM users WHERE {column} = ?1)"),
            params![code],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(code);
        }
    }
    Err(DatabaseError::ConstraintViolation(
        "external code space exhausted".into(),
    ))
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>, DatabaseError> {
    query_user(conn, "id = ?1", id)
}

/// Resolve a connection-side identifier to a user, tolerating both the
/// internal-id and external-code representations. An internal id that no
/// longer matches falls through to the code columns, which covers legacy rows
/// written before ids and codes were kept distinct.
pub fn resolve_user(conn: &Connection, user_ref: &UserRef) -> Result<Option<User>, DatabaseError> {
    match user_ref {
        UserRef::InternalId(id) => {
            if let Some(user) = query_user(conn, "id = ?1", id)? {
                return Ok(Some(user));
            }
            query_user(conn, "patient_code = ?1 OR doctor_code = ?1", id)
        }
        UserRef::ExternalCode(code) => {
            query_user(conn, "patient_code = ?1 OR doctor_code = ?1", code)
        }
    }
}

/// Verify credentials; returns the user when the password matches and the
/// account is active.
pub fn authenticate(
    conn: &Connection,
    email: &str,
    password: &str,
) -> Result<Option<User>, DatabaseError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, password_salt FROM users WHERE email = ?1 AND is_active = 1",
            params![email.to_lowercase()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, stored_hash, salt)) = row else {
        return Ok(None);
    };
    if hash_credential(&salt, password) != stored_hash {
        return Ok(None);
    }
    get_user(conn, &id)
}

/// Search active doctors, optionally filtered by specialty domain.
pub fn search_doctors(
    conn: &Connection,
    domain: Option<&str>,
) -> Result<Vec<User>, DatabaseError> {
    let mut sql = String::from(
        "SELECT id, first_name, last_name, email, role, patient_code, doctor_code,
         domain, is_active, created_at
         FROM users WHERE role = 'doctor' AND is_active = 1",
    );
    if domain.is_some() {
        sql.push_str(" AND domain = ?1");
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn.prepare(&sql)?;
    let map = |row: &rusqlite::Row<'_>| user_row(row);
    let rows = match domain {
        Some(d) => stmt.query_map(params![d], map)?,
        None => stmt.query_map([], map)?,
    };

    let mut doctors = Vec::new();
    for row in rows {
        doctors.push(user_from_row(row?)?);
    }
    Ok(doctors)
}

// ---------------------------------------------------------------------------
// Bearer tokens
// ---------------------------------------------------------------------------

/// Record an issued token hash for a user.
pub fn store_token(conn: &Connection, token_hash: &str, user_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO auth_tokens (token_hash, user_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![token_hash, user_id, Utc::now()],
    )?;
    Ok(())
}

/// Look up the user behind a token hash. Inactive accounts do not resolve.
pub fn user_for_token(conn: &Connection, token_hash: &str) -> Result<Option<User>, DatabaseError> {
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM auth_tokens WHERE token_hash = ?1",
            params![token_hash],
            |row| row.get(0),
        )
        .optional()?;

    match user_id {
        Some(id) => {
            let user = get_user(conn, &id)?;
            Ok(user.filter(|u| u.is_active))
        }
        None => Ok(None),
    }
}

pub fn revoke_token(conn: &Connection, token_hash: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE token_hash = ?1",
        params![token_hash],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    role: String,
    patient_code: Option<String>,
    doctor_code: Option<String>,
    domain: Option<String>,
    is_active: i32,
    created_at: DateTime<Utc>,
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        patient_code: row.get(5)?,
        doctor_code: row.get(6)?,
        domain: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    Ok(User {
        id: row.id,
        first_name: row.first_name,
        last_name: row.last_name,
        email: row.email,
        role: Role::from_str(&row.role)?,
        patient_code: row.patient_code,
        doctor_code: row.doctor_code,
        domain: row.domain,
        is_active: row.is_active != 0,
        created_at: row.created_at,
    })
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    value: &str,
) -> Result<Option<User>, DatabaseError> {
    let sql = format!(
        "SELECT id, first_name, last_name, email, role, patient_code, doctor_code,
         domain, is_active, created_at
         FROM users WHERE {predicate} LIMIT 1"
    );
    let row = conn
        .query_row(&sql, params![value], user_row)
        .optional()?;
    match row {
        Some(r) => Ok(Some(user_from_row(r)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn make_patient(conn: &Connection, email: &str) -> User {
        create_user(
            conn,
            &NewUser {
                first_name: "Asha".into(),
                last_name: "Rao".into(),
                email: email.into(),
                password: "hunter2hunter2".into(),
                role: Role::Patient,
                domain: None,
            },
        )
        .unwrap()
    }

    fn make_doctor(conn: &Connection, email: &str, domain: &str) -> User {
        create_user(
            conn,
            &NewUser {
                first_name: "Dana".into(),
                last_name: "Ito".into(),
                email: email.into(),
                password: "correct-horse".into(),
                role: Role::Doctor,
                domain: Some(domain.into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_assigns_role_matching_code() {
        let conn = open_memory_database().unwrap();
        let patient = make_patient(&conn, "asha@example.com");
        assert!(patient.patient_code.as_deref().unwrap().starts_with("RT-P-"));
        assert!(patient.doctor_code.is_none());

        let doctor = make_doctor(&conn, "dana@example.com", "Physiotherapist");
        assert!(doctor.doctor_code.as_deref().unwrap().starts_with("RT-D-"));
        assert!(doctor.patient_code.is_none());
    }

    #[test]
    fn resolve_by_internal_id_and_external_code() {
        let conn = open_memory_database().unwrap();
        let patient = make_patient(&conn, "asha@example.com");
        let code = patient.patient_code.clone().unwrap();

        let by_id = resolve_user(&conn, &UserRef::parse(&patient.id))
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, patient.id);

        let by_code = resolve_user(&conn, &UserRef::parse(&code)).unwrap().unwrap();
        assert_eq!(by_code.id, patient.id);
    }

    #[test]
    fn user_ref_classifies_by_shape() {
        assert!(matches!(
            UserRef::parse("0a6e7f1c-3f62-4c7a-9a45-2f9d0d4f3b10"),
            UserRef::InternalId(_)
        ));
        assert!(matches!(UserRef::parse("RT-P-0042"), UserRef::ExternalCode(_)));
    }

    #[test]
    fn resolve_unknown_is_none() {
        let conn = open_memory_database().unwrap();
        let missing = resolve_user(&conn, &UserRef::parse("RT-P-9999")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn authenticate_checks_password_and_activity() {
        let conn = open_memory_database().unwrap();
        let patient = make_patient(&conn, "asha@example.com");

        let ok = authenticate(&conn, "Asha@Example.com", "hunter2hunter2").unwrap();
        assert_eq!(ok.unwrap().id, patient.id);

        let wrong = authenticate(&conn, "asha@example.com", "nope").unwrap();
        assert!(wrong.is_none());

        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![patient.id])
            .unwrap();
        let inactive = authenticate(&conn, "asha@example.com", "hunter2hunter2").unwrap();
        assert!(inactive.is_none());
    }

    #[test]
    fn duplicate_email_rejected() {
        let conn = open_memory_database().unwrap();
        make_patient(&conn, "asha@example.com");
        let dup = create_user(
            &conn,
            &NewUser {
                first_name: "Other".into(),
                last_name: "Person".into(),
                email: "asha@example.com".into(),
                password: "pw-pw-pw".into(),
                role: Role::Patient,
                domain: None,
            },
        );
        assert!(dup.is_err());
    }

    #[test]
    fn search_doctors_filters_domain_and_activity() {
        let conn = open_memory_database().unwrap();
        make_doctor(&conn, "a@example.com", "Physiotherapist");
        make_doctor(&conn, "b@example.com", "Neurologist (Rehabilitation)");
        let inactive = make_doctor(&conn, "c@example.com", "Physiotherapist");
        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![inactive.id])
            .unwrap();
        make_patient(&conn, "p@example.com");

        let all = search_doctors(&conn, None).unwrap();
        assert_eq!(all.len(), 2);

        let physio = search_doctors(&conn, Some("Physiotherapist")).unwrap();
        assert_eq!(physio.len(), 1);
        assert_eq!(physio[0].email, "a@example.com");
    }

    #[test]
    fn token_round_trip_and_revocation() {
        let conn = open_memory_database().unwrap();
        let patient = make_patient(&conn, "asha@example.com");

        store_token(&conn, "hash-1", &patient.id).unwrap();
        let found = user_for_token(&conn, "hash-1").unwrap().unwrap();
        assert_eq!(found.id, patient.id);

        assert!(user_for_token(&conn, "hash-2").unwrap().is_none());

        revoke_token(&conn, "hash-1").unwrap();
        assert!(user_for_token(&conn, "hash-1").unwrap().is_none());
    }

    #[test]
    fn token_for_inactive_user_does_not_resolve() {
        let conn = open_memory_database().unwrap();
        let patient = make_patient(&conn, "asha@example.com");
        store_token(&conn, "hash-1", &patient.id).unwrap();
        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![patient.id])
            .unwrap();
        assert!(user_for_token(&conn, "hash-1").unwrap().is_none());
    }
}
