use std::sync::Arc;

use validator::Validate;

use crate::crypto::{PasswordManager, generate_temporary_password};
use crate::error::{Result, ServerError};
use crate::mail::{Notification, NotificationGateway, Template};
use crate::ngo::NgoId;
use crate::volunteer::{NewVolunteer, Volunteer, VolunteerId, VolunteerRepository};

/// Volunteer roster of approved NGOs.
#[derive(Clone)]
pub struct VolunteerService {
    repo: Arc<dyn VolunteerRepository>,
    passwords: Arc<PasswordManager>,
    notifications: NotificationGateway,
}

impl VolunteerService {
    /// Create a new [`VolunteerService`].
    pub fn new(
        repo: Arc<dyn VolunteerRepository>,
        passwords: Arc<PasswordManager>,
        notifications: NotificationGateway,
    ) -> Self {
        Self {
            repo,
            passwords,
            notifications,
        }
    }

    /// Add a volunteer to `ngo` and send its credentials.
    pub async fn add(
        &self,
        ngo: NgoId,
        ngo_name: &str,
        form: NewVolunteer,
    ) -> Result<Volunteer> {
        form.validate()?;

        let password = generate_temporary_password();
        let hash = self.passwords.hash_blocking(password.clone()).await?;

        let volunteer = Volunteer::new(ngo, form, hash);
        self.repo.insert(&volunteer).await?;

        tracing::info!(ngo_id = %ngo, volunteer_id = %volunteer.id, "volunteer added");

        self.notifications.dispatch(
            Notification::new(Template::VolunteerCredentials, &volunteer.email)
                .with("name", volunteer.name.clone())
                .with("ngoName", ngo_name)
                .with("temporaryPassword", password),
        );

        Ok(Volunteer {
            password: None,
            ..volunteer
        })
    }

    /// Volunteers of `ngo`, newest first.
    pub async fn list(&self, ngo: NgoId) -> Result<Vec<Volunteer>> {
        self.repo.list_by_ngo(ngo).await
    }

    /// Delete a volunteer owned by `ngo`.
    pub async fn delete(&self, ngo: NgoId, id: VolunteerId) -> Result<()> {
        if !self.repo.delete(ngo, id).await? {
            return Err(ServerError::NotFound);
        }

        tracing::info!(ngo_id = %ngo, volunteer_id = %id, "volunteer deleted");
        Ok(())
    }
}
