//! In-memory storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, ServerError};
use crate::ngo::{
    Ngo, NgoId, NgoRepository, NgoStatus, Transition, duplicate_fields,
};
use crate::volunteer::{Volunteer, VolunteerId, VolunteerRepository};

#[derive(Default)]
struct Tables {
    ngos: HashMap<NgoId, Ngo>,
    volunteers: HashMap<VolunteerId, Volunteer>,
}

/// Store keeping every table behind one lock, so uniqueness checks and
/// writes happen in the same critical section.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn without_password(ngo: &Ngo) -> Ngo {
    Ngo {
        password: None,
        ..ngo.clone()
    }
}

#[async_trait]
impl NgoRepository for MemoryStore {
    async fn insert(&self, ngo: &Ngo) -> Result<()> {
        let mut tables = self.lock();

        let (mut email, mut registration_number, mut certificate_number) =
            (false, false, false);
        for existing in tables.ngos.values() {
            email |= existing.email == ngo.email;
            registration_number |=
                existing.registration_number == ngo.registration_number;
            certificate_number |= ngo.certificate_number.is_some()
                && existing.certificate_number == ngo.certificate_number;
        }

        let fields =
            duplicate_fields(email, registration_number, certificate_number);
        if !fields.is_empty() {
            return Err(ServerError::DuplicateRegistration { fields });
        }

        tables.ngos.insert(ngo.id, ngo.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: NgoId) -> Result<Option<Ngo>> {
        Ok(self.lock().ngos.get(&id).map(without_password))
    }

    async fn find_for_login(&self, email: &str) -> Result<Option<Ngo>> {
        Ok(self
            .lock()
            .ngos
            .values()
            .find(|ngo| ngo.email == email)
            .cloned())
    }

    async fn list(&self, status: Option<NgoStatus>) -> Result<Vec<Ngo>> {
        let mut ngos: Vec<Ngo> = self
            .lock()
            .ngos
            .values()
            .filter(|ngo| status.is_none_or(|status| ngo.status == status))
            .map(without_password)
            .collect();
        ngos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ngos)
    }

    async fn transition(
        &self,
        id: NgoId,
        transition: &Transition,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(ngo) = tables
            .ngos
            .get_mut(&id)
            .filter(|ngo| ngo.status == transition.from)
        else {
            return Ok(false);
        };

        ngo.status = transition.to;
        if let Some(password) = &transition.password {
            ngo.password = Some(password.clone());
        }
        ngo.rejection_reason = if transition.to == NgoStatus::Rejected {
            transition.rejection_reason.clone()
        } else {
            None
        };
        ngo.updated_at = Utc::now();

        Ok(true)
    }
}

#[async_trait]
impl VolunteerRepository for MemoryStore {
    async fn insert(&self, volunteer: &Volunteer) -> Result<()> {
        let mut tables = self.lock();

        if !tables.ngos.contains_key(&volunteer.ngo) {
            return Err(ServerError::NotFound);
        }
        if tables
            .volunteers
            .values()
            .any(|existing| existing.email == volunteer.email)
        {
            return Err(ServerError::DuplicateEmail);
        }

        tables.volunteers.insert(volunteer.id, volunteer.clone());
        Ok(())
    }

    async fn list_by_ngo(&self, ngo: NgoId) -> Result<Vec<Volunteer>> {
        let mut volunteers: Vec<Volunteer> = self
            .lock()
            .volunteers
            .values()
            .filter(|volunteer| volunteer.ngo == ngo)
            .map(|volunteer| Volunteer {
                password: None,
                ..volunteer.clone()
            })
            .collect();
        volunteers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(volunteers)
    }

    async fn delete(&self, ngo: NgoId, id: VolunteerId) -> Result<bool> {
        let mut tables = self.lock();
        match tables.volunteers.get(&id) {
            Some(volunteer) if volunteer.ngo == ngo => {
                tables.volunteers.remove(&id);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}
