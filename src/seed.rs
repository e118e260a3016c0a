use serde::Serialize;

use crate::capability::Session;
use crate::engine::LeadEngine;
use crate::error::EngineResult;
use crate::models::{EntryChannel, NewLead, Program, Role};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedSummary {
    pub programs: usize,
    pub staff_added: usize,
    pub leads_added: usize,
}

/// Loads a small demo organisation. Safe to run twice: staff and leads whose
/// email already exists are skipped.
pub fn seed_demo(engine: &mut LeadEngine) -> EngineResult<SeedSummary> {
    let session = Session::system();
    let mut summary = SeedSummary::default();

    let programs = [
        ("guitar", "Jazz Guitar"),
        ("piano", "Classical Piano"),
        ("voice", "Voice and Choir"),
        ("production", "Music Production"),
    ];
    for (id, name) in programs {
        engine.store.upsert_program(Program {
            id: id.to_string(),
            name: name.to_string(),
            active: true,
        });
        summary.programs += 1;
    }

    let staff = [
        ("Carolina Vasquez", "carolina.vasquez@groupscholar.com", Role::KeyMaster),
        ("Avery Lee", "avery.lee@groupscholar.com", Role::CaseWorker),
        ("Jules Moreno", "jules.moreno@groupscholar.com", Role::CaseWorker),
        ("Kiara Patel", "kiara.patel@groupscholar.com", Role::DataEntry),
        ("Tomas Ibarra", "tomas.ibarra@groupscholar.com", Role::ReportsOnly),
    ];
    for (name, email, role) in staff {
        if engine.store().staff_by_email(email).is_some() {
            continue;
        }
        engine.add_staff(&session, name, email, role)?;
        summary.staff_added += 1;
    }

    let leads = [
        ("Ana Soto", "ana.soto@example.com", "+56 9 5555 0101", "guitar", EntryChannel::Form),
        ("Luis Rojas", "luis.rojas@example.com", "+56 9 5555 0102", "piano", EntryChannel::Form),
        ("Marta Diaz", "marta.diaz@example.com", "+56 9 5555 0103", "voice", EntryChannel::Manual),
        ("Carla Vidal", "carla.vidal@example.com", "+56 9 5555 0104", "production", EntryChannel::Manual),
    ];
    for (name, email, phone, program, channel) in leads {
        let exists = engine
            .store()
            .leads()
            .iter()
            .any(|lead| lead.email.as_deref() == Some(email));
        if exists {
            continue;
        }
        engine.insert_new_lead(
            &session,
            NewLead {
                name: name.to_string(),
                email: Some(email.to_string()),
                phone: Some(phone.to_string()),
                program_id: Some(program.to_string()),
                notes: None,
                channel: Some(channel),
                assigned_to: None,
            },
            None,
        )?;
        summary.leads_added += 1;
    }

    engine.commit()?;
    tracing::info!(
        staff = summary.staff_added,
        leads = summary.leads_added,
        "demo data seeded"
    );
    Ok(summary)
}
