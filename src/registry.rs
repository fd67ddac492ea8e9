//! Connection Registry — the patient-doctor relationship lifecycle.
//!
//! Owns connection creation, status transitions (pending → accepted/declined,
//! accepted → archived), the single-pending-request invariant, and the
//! party/ownership checks used by every other component. Accept and decline
//! write to the notification sink as a side effect.
//!
//! `patient_id`/`doctor_id` on a connection are opaque strings that may hold
//! a directory id or an external code; all counterpart matching goes through
//! [`crate::directory::UserRef`] or the code-tolerant helpers below.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::directory::{self, User, UserRef, UserSummary};
use crate::models::{ConnectionStatus, NotificationType, Role};
use crate::notifications;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("A request for this pair is already {status:?}")]
    Duplicate { status: ConnectionStatus },

    #[error("Connection not found")]
    NotFound,

    #[error("Actor is not a party to this connection")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Database(err.into())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StoredConnection {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub problem: String,
    pub message: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub patient_id: String,
    pub doctor_id: String,
    pub problem: String,
    pub message: String,
}

/// Connection with both parties resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedConnection {
    #[serde(flatten)]
    pub connection: StoredConnection,
    pub patient: UserSummary,
    pub doctor: UserSummary,
}

/// Result of the pair-status probe used by the connect UI.
#[derive(Debug, Clone, Serialize)]
pub struct PairStatus {
    pub exists: bool,
    pub status: Option<ConnectionStatus>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a pending connection request.
///
/// The existence check runs first so the common case gets a clean
/// [`RegistryError::Duplicate`]; the partial unique index on pending pairs is
/// the authoritative backstop against races, and a constraint violation on
/// insert is mapped to the same error.
pub fn request_connection(
    conn: &Connection,
    req: &ConnectionRequest,
) -> Result<StoredConnection, RegistryError> {
    if req.patient_id.trim().is_empty() || req.doctor_id.trim().is_empty() {
        return Err(RegistryError::Validation(
            "patient and doctor identifiers are required".into(),
        ));
    }
    if req.problem.trim().is_empty() {
        return Err(RegistryError::Validation("problem is required".into()));
    }

    let pending: Option<String> = conn
        .query_row(
            "SELECT status FROM connections
             WHERE patient_id = ?1 AND doctor_id = ?2 AND status = 'pending'",
            params![req.patient_id, req.doctor_id],
            |row| row.get(0),
        )
        .optional()?;
    if pending.is_some() {
        return Err(RegistryError::Duplicate {
            status: ConnectionStatus::Pending,
        });
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let inserted = conn.execute(
        "INSERT INTO connections (id, patient_id, doctor_id, problem, message, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
        params![id, req.patient_id, req.doctor_id, req.problem, req.message, now],
    );
    if let Err(e) = inserted {
        let db_err = DatabaseError::from(e);
        if db_err.is_unique_violation() {
            return Err(RegistryError::Duplicate {
                status: ConnectionStatus::Pending,
            });
        }
        return Err(db_err.into());
    }

    get_connection(conn, &id)?.ok_or(RegistryError::NotFound)
}

pub fn get_connection(
    conn: &Connection,
    id: &str,
) -> Result<Option<StoredConnection>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, doctor_id, problem, message, status, created_at, updated_at
             FROM connections WHERE id = ?1",
            params![id],
            connection_row,
        )
        .optional()?;
    match row {
        Some(r) => Ok(Some(connection_from_row(r)?)),
        None => Ok(None),
    }
}

/// Accept a pending request; notifies the patient.
pub fn accept_connection(
    conn: &Connection,
    id: &str,
) -> Result<StoredConnection, RegistryError> {
    let connection = get_connection(conn, id)?.ok_or(RegistryError::NotFound)?;

    set_status(conn, id, ConnectionStatus::Accepted)?;
    notifications::insert_notification(
        conn,
        &connection.patient_id,
        NotificationType::Success,
        "Your request has been accepted!",
        None,
    )?;

    get_connection(conn, id)?.ok_or(RegistryError::NotFound)
}

/// Decline a request with an optional reason; notifies the patient.
///
/// There is deliberately no "already decided" guard: the last transition
/// wins, and both notifications remain on record.
pub fn decline_connection(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
) -> Result<StoredConnection, RegistryError> {
    let connection = get_connection(conn, id)?.ok_or(RegistryError::NotFound)?;

    set_status(conn, id, ConnectionStatus::Declined)?;
    notifications::insert_notification(
        conn,
        &connection.patient_id,
        NotificationType::Decline,
        "Your request was declined",
        Some(reason.unwrap_or("No reason provided")),
    )?;

    get_connection(conn, id)?.ok_or(RegistryError::NotFound)
}

/// Archive a connection. Only the owning doctor may do this.
pub fn archive_connection(
    conn: &Connection,
    id: &str,
    acting_doctor: &User,
) -> Result<StoredConnection, RegistryError> {
    let connection = get_connection(conn, id)?.ok_or(RegistryError::NotFound)?;
    if !doctor_matches(&connection.doctor_id, acting_doctor) {
        return Err(RegistryError::Unauthorized);
    }

    set_status(conn, id, ConnectionStatus::Archived)?;
    get_connection(conn, id)?.ok_or(RegistryError::NotFound)
}

fn set_status(
    conn: &Connection,
    id: &str,
    status: ConnectionStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE connections SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), Utc::now()],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Authorization helpers
// ---------------------------------------------------------------------------

/// True when the stored doctor identifier denotes this user, in either the
/// internal-id or external-code representation.
pub fn doctor_matches(stored_doctor_id: &str, user: &User) -> bool {
    user.id == stored_doctor_id || user.doctor_code.as_deref() == Some(stored_doctor_id)
}

/// True when the stored patient identifier denotes this user.
pub fn patient_matches(stored_patient_id: &str, user: &User) -> bool {
    user.id == stored_patient_id || user.patient_code.as_deref() == Some(stored_patient_id)
}

/// True when the actor is a party (either side) to the connection.
pub fn is_authorized_party(connection: &StoredConnection, actor: &User) -> bool {
    doctor_matches(&connection.doctor_id, actor) || patient_matches(&connection.patient_id, actor)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Connections where the actor is on the given side, optionally filtered by
/// status, newest first. Matches both identifier representations.
pub fn list_by_role(
    conn: &Connection,
    actor: &User,
    role: Role,
    status: Option<ConnectionStatus>,
) -> Result<Vec<StoredConnection>, DatabaseError> {
    let (column, code) = match role {
        Role::Patient => ("patient_id", actor.patient_code.as_deref()),
        Role::Doctor => ("doctor_id", actor.doctor_code.as_deref()),
    };
    // The code column may be unset; reuse the id so the param count is stable.
    let code = code.unwrap_or(actor.id.as_str());

    let mut sql = format!(
        "SELECT id, patient_id, doctor_id, problem, message, status, created_at, updated_at
         FROM connections WHERE ({column} = ?1 OR {column} = ?2)"
    );
    if status.is_some() {
        sql.push_str(" AND status = ?3");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match status {
        Some(s) => stmt.query_map(params![actor.id, code, s.as_str()], connection_row)?,
        None => stmt.query_map(params![actor.id, code], connection_row)?,
    };

    let mut connections = Vec::new();
    for row in rows {
        connections.push(connection_from_row(row?)?);
    }
    Ok(connections)
}

/// Closed connections (declined/completed/archived) for a patient, most
/// recently updated first.
pub fn list_history(
    conn: &Connection,
    patient: &User,
) -> Result<Vec<StoredConnection>, DatabaseError> {
    let code = patient.patient_code.as_deref().unwrap_or(patient.id.as_str());
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, doctor_id, problem, message, status, created_at, updated_at
         FROM connections
         WHERE (patient_id = ?1 OR patient_id = ?2)
           AND status IN ('declined', 'completed', 'archived')
         ORDER BY updated_at DESC",
    )?;
    let rows = stmt.query_map(params![patient.id, code], connection_row)?;

    let mut connections = Vec::new();
    for row in rows {
        connections.push(connection_from_row(row?)?);
    }
    Ok(connections)
}

/// Most recent connection between this patient and the given doctor, any
/// status — feeds the "already pending/accepted" UI before a new request.
pub fn check_pair_status(
    conn: &Connection,
    patient: &User,
    doctor_id: &str,
) -> Result<PairStatus, DatabaseError> {
    let code = patient.patient_code.as_deref().unwrap_or(patient.id.as_str());
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM connections
             WHERE (patient_id = ?1 OR patient_id = ?2) AND doctor_id = ?3
             ORDER BY created_at DESC LIMIT 1",
            params![patient.id, code, doctor_id],
            |row| row.get(0),
        )
        .optional()?;

    match status {
        Some(s) => Ok(PairStatus {
            exists: true,
            status: Some(ConnectionStatus::from_str(&s)?),
        }),
        None => Ok(PairStatus {
            exists: false,
            status: None,
        }),
    }
}

/// Resolve both parties for display, substituting placeholders for
/// identifiers that no longer resolve.
pub fn enrich(
    conn: &Connection,
    connection: StoredConnection,
) -> Result<EnrichedConnection, DatabaseError> {
    let patient = directory::resolve_user(conn, &UserRef::parse(&connection.patient_id))?
        .map(UserSummary::from)
        .unwrap_or_else(|| UserSummary::unknown(Role::Patient));
    let doctor = directory::resolve_user(conn, &UserRef::parse(&connection.doctor_id))?
        .map(UserSummary::from)
        .unwrap_or_else(|| UserSummary::unknown(Role::Doctor));

    Ok(EnrichedConnection {
        connection,
        patient,
        doctor,
    })
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type ConnectionRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn connection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn connection_from_row(row: ConnectionRow) -> Result<StoredConnection, DatabaseError> {
    let (id, patient_id, doctor_id, problem, message, status, created_at, updated_at) = row;
    Ok(StoredConnection {
        id,
        patient_id,
        doctor_id,
        problem,
        message,
        status: ConnectionStatus::from_str(&status)?,
        created_at,
        updated_at,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::directory::{create_user, NewUser};

    fn seed_pair(conn: &Connection) -> (User, User) {
        let patient = create_user(
            conn,
            &NewUser {
                first_name: "Asha".into(),
                last_name: "Rao".into(),
                email: "asha@example.com".into(),
                password: "hunter2hunter2".into(),
                role: Role::Patient,
                domain: None,
            },
        )
        .unwrap();
        let doctor = create_user(
            conn,
            &NewUser {
                first_name: "Dana".into(),
                last_name: "Ito".into(),
                email: "dana@example.com".into(),
                password: "correct-horse".into(),
                role: Role::Doctor,
                domain: Some("Physiotherapist".into()),
            },
        )
        .unwrap();
        (patient, doctor)
    }

    fn request(conn: &Connection, patient: &User, doctor: &User) -> StoredConnection {
        request_connection(
            conn,
            &ConnectionRequest {
                patient_id: patient.id.clone(),
                doctor_id: doctor.id.clone(),
                problem: "Post-surgery knee rehab".into(),
                message: "Need a recovery plan".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn request_starts_pending() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c = request(&conn, &patient, &doctor);
        assert_eq!(c.status, ConnectionStatus::Pending);
    }

    #[test]
    fn second_pending_request_is_duplicate() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        request(&conn, &patient, &doctor);

        let second = request_connection(
            &conn,
            &ConnectionRequest {
                patient_id: patient.id.clone(),
                doctor_id: doctor.id.clone(),
                problem: "again".into(),
                message: "again".into(),
            },
        );
        assert!(matches!(
            second,
            Err(RegistryError::Duplicate {
                status: ConnectionStatus::Pending
            })
        ));

        let pending: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM connections WHERE patient_id = ?1 AND doctor_id = ?2 AND status = 'pending'",
                params![patient.id, doctor.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(pending, 1);
    }

    #[test]
    fn request_after_decline_is_allowed() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let first = request(&conn, &patient, &doctor);
        decline_connection(&conn, &first.id, None).unwrap();

        let second = request(&conn, &patient, &doctor);
        assert_eq!(second.status, ConnectionStatus::Pending);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let conn = open_memory_database().unwrap();
        let result = request_connection(
            &conn,
            &ConnectionRequest {
                patient_id: "".into(),
                doctor_id: "d".into(),
                problem: "p".into(),
                message: "m".into(),
            },
        );
        assert!(matches!(result, Err(RegistryError::Validation(_))));
    }

    #[test]
    fn accept_notifies_patient() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c = request(&conn, &patient, &doctor);

        let accepted = accept_connection(&conn, &c.id).unwrap();
        assert_eq!(accepted.status, ConnectionStatus::Accepted);

        let inbox = notifications::list_for_user(&conn, &patient.id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::Success);
    }

    #[test]
    fn accept_then_decline_lands_on_declined_with_both_notifications() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c = request(&conn, &patient, &doctor);

        accept_connection(&conn, &c.id).unwrap();
        let declined = decline_connection(&conn, &c.id, Some("fully booked")).unwrap();
        assert_eq!(declined.status, ConnectionStatus::Declined);

        let inbox = notifications::list_for_user(&conn, &patient.id).unwrap();
        let successes = inbox
            .iter()
            .filter(|n| n.kind == NotificationType::Success)
            .count();
        let declines = inbox
            .iter()
            .filter(|n| n.kind == NotificationType::Decline)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(declines, 1);
        let decline = inbox
            .iter()
            .find(|n| n.kind == NotificationType::Decline)
            .unwrap();
        assert_eq!(decline.reason.as_deref(), Some("fully booked"));
    }

    #[test]
    fn transitions_on_missing_connection_are_not_found() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            accept_connection(&conn, "nope"),
            Err(RegistryError::NotFound)
        ));
        assert!(matches!(
            decline_connection(&conn, "nope", None),
            Err(RegistryError::NotFound)
        ));
    }

    #[test]
    fn archive_requires_owning_doctor() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let other = create_user(
            &conn,
            &NewUser {
                first_name: "Om".into(),
                last_name: "Ng".into(),
                email: "om@example.com".into(),
                password: "pw-pw-pw-pw".into(),
                role: Role::Doctor,
                domain: None,
            },
        )
        .unwrap();
        let c = request(&conn, &patient, &doctor);
        accept_connection(&conn, &c.id).unwrap();

        assert!(matches!(
            archive_connection(&conn, &c.id, &other),
            Err(RegistryError::Unauthorized)
        ));

        let archived = archive_connection(&conn, &c.id, &doctor).unwrap();
        assert_eq!(archived.status, ConnectionStatus::Archived);
    }

    #[test]
    fn party_check_tolerates_code_identifiers() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);

        // Connection written with the patient's external code instead of id
        let c = request_connection(
            &conn,
            &ConnectionRequest {
                patient_id: patient.patient_code.clone().unwrap(),
                doctor_id: doctor.id.clone(),
                problem: "knee".into(),
                message: "help".into(),
            },
        )
        .unwrap();

        assert!(is_authorized_party(&c, &patient));
        assert!(is_authorized_party(&c, &doctor));

        let stranger = create_user(
            &conn,
            &NewUser {
                first_name: "Sam".into(),
                last_name: "Qi".into(),
                email: "sam@example.com".into(),
                password: "pw-pw-pw-pw".into(),
                role: Role::Patient,
                domain: None,
            },
        )
        .unwrap();
        assert!(!is_authorized_party(&c, &stranger));
    }

    #[test]
    fn list_by_role_filters_and_sorts() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c1 = request(&conn, &patient, &doctor);
        accept_connection(&conn, &c1.id).unwrap();
        let c2 = request(&conn, &patient, &doctor);

        let all = list_by_role(&conn, &doctor, Role::Doctor, None).unwrap();
        assert_eq!(all.len(), 2);

        let pending =
            list_by_role(&conn, &doctor, Role::Doctor, Some(ConnectionStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c2.id);

        let mine = list_by_role(&conn, &patient, Role::Patient, None).unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[test]
    fn history_returns_closed_connections() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c1 = request(&conn, &patient, &doctor);
        decline_connection(&conn, &c1.id, None).unwrap();
        let c2 = request(&conn, &patient, &doctor);
        accept_connection(&conn, &c2.id).unwrap();

        let history = list_history(&conn, &patient).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, c1.id);
    }

    #[test]
    fn pair_status_probe() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);

        let before = check_pair_status(&conn, &patient, &doctor.id).unwrap();
        assert!(!before.exists);

        let c = request(&conn, &patient, &doctor);
        accept_connection(&conn, &c.id).unwrap();

        let after = check_pair_status(&conn, &patient, &doctor.id).unwrap();
        assert!(after.exists);
        assert_eq!(after.status, Some(ConnectionStatus::Accepted));
    }

    #[test]
    fn enrich_resolves_both_parties() {
        let conn = open_memory_database().unwrap();
        let (patient, doctor) = seed_pair(&conn);
        let c = request_connection(
            &conn,
            &ConnectionRequest {
                patient_id: patient.patient_code.clone().unwrap(),
                doctor_id: doctor.id.clone(),
                problem: "knee".into(),
                message: "help".into(),
            },
        )
        .unwrap();

        let enriched = enrich(&conn, c).unwrap();
        assert_eq!(enriched.patient.first_name, "Asha");
        assert_eq!(enriched.doctor.first_name, "Dana");
    }

    #[test]
    fn enrich_falls_back_to_placeholder() {
        let conn = open_memory_database().unwrap();
        let (_, doctor) = seed_pair(&conn);
        let c = request_connection(
            &conn,
            &ConnectionRequest {
                patient_id: "RT-P-0000".into(),
                doctor_id: doctor.id.clone(),
                problem: "knee".into(),
                message: "help".into(),
            },
        )
        .unwrap();

        let enriched = enrich(&conn, c).unwrap();
        assert_eq!(enriched.patient.first_name, "Unknown");
        assert_eq!(enriched.patient.last_name, "Patient");
    }
}
