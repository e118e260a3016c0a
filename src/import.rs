//! Bulk lead import from CSV text. Columns are matched by keyword on
//! normalized header names; rows colliding with an existing lead by email or
//! phone are skipped as duplicates. Explicit column choices override the
//! keyword match field by field.

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::capability::Session;
use crate::dedup::{exact_contact_match, normalize_phone, MatchSignal};
use crate::engine::LeadEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{EntryChannel, ImportRecord, ImportRowResult, NewLead, RowOutcome};
use crate::store::Store;

const NAME_KEYWORDS: &[&str] = &["nombre", "name", "contacto", "cliente"];
const EMAIL_KEYWORDS: &[&str] = &["email", "correo", "mail"];
const PHONE_KEYWORDS: &[&str] = &["telefono", "celular", "fono", "movil", "phone", "tel"];
const PROGRAM_KEYWORDS: &[&str] = &[
    "carrera",
    "instrumento",
    "curso",
    "programa",
    "interes",
    "program",
];
const NOTES_KEYWORDS: &[&str] = &["nota", "comentario", "observacion", "detalle", "mensaje", "note"];

const DEFAULT_NOTES: &str = "Imported from CSV";
const ERROR_PREVIEW_LIMIT: usize = 10;
const MIN_NAME_CHARS: usize = 2;

/// Lowercase, strip accents, keep ASCII letters and digits.
pub fn normalize_header(header: &str) -> String {
    header
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Column index for each lead field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMap {
    pub name: Option<usize>,
    pub email: Option<usize>,
    pub phone: Option<usize>,
    pub program: Option<usize>,
    pub notes: Option<usize>,
}

impl ColumnMap {
    pub fn detect(headers: &[String]) -> Self {
        let find = |keywords: &[&str]| {
            keywords
                .iter()
                .find_map(|keyword| headers.iter().position(|h| h.contains(keyword)))
        };
        Self {
            name: find(NAME_KEYWORDS),
            email: find(EMAIL_KEYWORDS),
            phone: find(PHONE_KEYWORDS),
            program: find(PROGRAM_KEYWORDS),
            notes: find(NOTES_KEYWORDS),
        }
    }
}

/// Header chosen by the user for each lead field. Fields left unset are
/// found by keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOverrides {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub program: Option<String>,
    pub notes: Option<String>,
}

impl ColumnOverrides {
    /// Records one `field=header` choice, e.g. `name=Alumno`.
    pub fn set(&mut self, pair: &str) -> EngineResult<()> {
        let (field, header) = pair.split_once('=').ok_or_else(|| {
            EngineError::InvalidInput(format!("expected field=header, got `{pair}`"))
        })?;
        let slot = match field.trim() {
            "name" => &mut self.name,
            "email" => &mut self.email,
            "phone" => &mut self.phone,
            "program" => &mut self.program,
            "notes" => &mut self.notes,
            other => {
                return Err(EngineError::InvalidInput(format!(
                    "unknown import field `{other}`"
                )))
            }
        };
        *slot = Some(header.trim().to_string());
        Ok(())
    }

    /// Replaces detected columns with the chosen ones. A chosen header that
    /// is not in the file is an error.
    pub fn apply(&self, headers: &[String], detected: ColumnMap) -> EngineResult<ColumnMap> {
        let locate = |chosen: &Option<String>, fallback: Option<usize>| match chosen {
            None => Ok(fallback),
            Some(header) => {
                let wanted = normalize_header(header);
                headers
                    .iter()
                    .position(|h| *h == wanted)
                    .map(Some)
                    .ok_or_else(|| {
                        EngineError::InvalidInput(format!("column \"{header}\" not found"))
                    })
            }
        };
        Ok(ColumnMap {
            name: locate(&self.name, detected.name)?,
            email: locate(&self.email, detected.email)?,
            phone: locate(&self.phone, detected.phone)?,
            program: locate(&self.program, detected.program)?,
            notes: locate(&self.notes, detected.notes)?,
        })
    }
}

fn field(record: &StringRecord, column: Option<usize>) -> &str {
    column.and_then(|index| record.get(index)).unwrap_or("").trim()
}

/// Catalog program whose name contains, or is contained in, `text`. Falls
/// back to the first program in the catalog.
pub fn match_program(store: &Store, text: &str) -> Option<String> {
    let wanted = text.trim().to_lowercase();
    let programs = store.programs();
    let found = if wanted.is_empty() {
        None
    } else {
        programs.iter().find(|program| {
            let name = program.name.to_lowercase();
            name.contains(&wanted) || wanted.contains(&name)
        })
    };
    found.or(programs.first()).map(|program| program.id.clone())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub imports: usize,
    pub leads_imported: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub last_import: Option<Uuid>,
}

pub fn import_stats(store: &Store) -> ImportStats {
    let history = store.import_history(usize::MAX);
    ImportStats {
        imports: history.len(),
        leads_imported: history.iter().map(|record| record.imported).sum(),
        duplicates: history.iter().map(|record| record.duplicates).sum(),
        errors: history.iter().map(|record| record.errors).sum(),
        last_import: history.first().map(|record| record.id),
    }
}

impl LeadEngine {
    pub fn import_csv(&mut self, session: &Session, text: &str) -> EngineResult<ImportRecord> {
        self.import_csv_with(session, text, &ColumnOverrides::default())
    }

    pub fn import_csv_with(
        &mut self,
        session: &Session,
        text: &str,
        overrides: &ColumnOverrides,
    ) -> EngineResult<ImportRecord> {
        session.require(session.capabilities.can_configure, "import leads")?;

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(normalize_header)
            .collect();
        let columns = overrides.apply(&headers, ColumnMap::detect(&headers))?;
        if columns.name.is_none() {
            return Err(EngineError::InvalidInput(
                "no name column found; add a column called \"name\" or \"nombre\"".to_string(),
            ));
        }
        tracing::debug!(?columns, "import columns detected");

        let records: Vec<(usize, Result<StringRecord, csv::Error>)> = reader
            .records()
            .enumerate()
            .map(|(index, record)| {
                let line = record
                    .as_ref()
                    .ok()
                    .and_then(|r| r.position())
                    .map(|p| p.line() as usize)
                    .unwrap_or(index + 2);
                (line, record)
            })
            .collect();
        if records.is_empty() {
            return Err(EngineError::InvalidInput(
                "the file is empty or has no data rows".to_string(),
            ));
        }

        let mut rows = Vec::with_capacity(records.len());
        let mut messages = Vec::new();
        for (line, record) in &records {
            let outcome = match record {
                Ok(record) => self.import_row(session, record, &columns),
                Err(err) => RowOutcome::Error {
                    reason: format!("malformed row: {err}"),
                },
            };
            match &outcome {
                RowOutcome::Duplicate { reason } | RowOutcome::Error { reason } => {
                    messages.push(format!("Line {line}: {reason}"));
                }
                RowOutcome::Imported { .. } => {}
            }
            rows.push(ImportRowResult {
                line: *line,
                outcome,
            });
        }

        let count = |wanted: fn(&RowOutcome) -> bool| {
            rows.iter().filter(|row| wanted(&row.outcome)).count()
        };
        let record = ImportRecord {
            id: Uuid::new_v4(),
            imported_at: self.now(),
            actor_id: session.user_id,
            actor_name: session.name.clone(),
            rows_processed: rows.len(),
            imported: count(|o| matches!(o, RowOutcome::Imported { .. })),
            duplicates: count(|o| matches!(o, RowOutcome::Duplicate { .. })),
            errors: count(|o| matches!(o, RowOutcome::Error { .. })),
            error_preview: messages.into_iter().take(ERROR_PREVIEW_LIMIT).collect(),
            rows,
        };

        tracing::info!(
            import = %record.id,
            imported = record.imported,
            duplicates = record.duplicates,
            errors = record.errors,
            "csv import finished"
        );
        self.store
            .record_import(record.clone(), self.config.org.import_history_limit);
        self.commit()?;
        Ok(record)
    }

    fn import_row(
        &mut self,
        session: &Session,
        record: &StringRecord,
        columns: &ColumnMap,
    ) -> RowOutcome {
        let name = field(record, columns.name);
        let email = field(record, columns.email);
        let phone = field(record, columns.phone);
        let notes = field(record, columns.notes);

        if name.chars().count() < MIN_NAME_CHARS {
            return RowOutcome::Error {
                reason: "empty or invalid name".to_string(),
            };
        }

        let email = Some(email).filter(|e| !e.is_empty());
        let phone = Some(phone).filter(|p| !p.is_empty());
        if let Some((existing, signal)) =
            exact_contact_match(&self.store, email, phone, &self.config.tuning)
        {
            let reason = match signal {
                MatchSignal::Email => format!(
                    "email \"{}\" already exists ({})",
                    email.unwrap_or_default(),
                    existing.name
                ),
                _ => format!(
                    "phone \"{}\" already exists ({})",
                    phone.map(normalize_phone).unwrap_or_default(),
                    existing.name
                ),
            };
            return RowOutcome::Duplicate { reason };
        }

        let new = NewLead {
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            program_id: match_program(&self.store, field(record, columns.program)),
            notes: Some(if notes.is_empty() { DEFAULT_NOTES } else { notes }.to_string()),
            channel: Some(EntryChannel::Import),
            assigned_to: None,
        };
        match self.insert_new_lead(session, new, None) {
            Ok(created) => RowOutcome::Imported {
                lead_id: created.lead.id,
                name: created.lead.name,
            },
            Err(err) => RowOutcome::Error {
                reason: err.user_message(),
            },
        }
    }
}
