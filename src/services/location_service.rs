//! Location service - storage locations samples can be placed in

use tracing::info;

use crate::db::locations::{self, CreateLocationInput};
use crate::db::models::StorageLocation;
use crate::error::LabError;

use super::events::LabEvent;
use super::{require_text, ServiceContext};

pub struct LocationService {
    ctx: ServiceContext,
}

impl LocationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn create(&self, input: CreateLocationInput) -> Result<StorageLocation, LabError> {
        require_text(&input.name, "name")?;
        require_text(&input.location_type, "location_type")?;

        let now = self.ctx.clock.now();
        let location = self.ctx.db.write(|tx| locations::insert_location(tx, &input, now))?;

        info!(id = location.id, name = %location.name, "Created storage location");
        self.ctx.events.emit(LabEvent::LocationCreated {
            id: location.id,
            name: location.name.clone(),
        });
        Ok(location)
    }

    pub fn get(&self, id: i64) -> Result<Option<StorageLocation>, LabError> {
        self.ctx.db.with_conn(|conn| locations::get_location(conn, id))
    }

    /// All locations by name
    pub fn list(&self) -> Result<Vec<StorageLocation>, LabError> {
        self.ctx.db.with_conn(locations::list_locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::LabDb;
    use crate::services::Services;
    use std::sync::Arc;

    #[test]
    fn test_create_and_list() {
        let svc = Services::new(Arc::new(LabDb::open_in_memory().unwrap()), Config::default());
        let freezer = svc
            .locations
            .create(CreateLocationInput {
                name: "Freezer B".into(),
                location_type: "freezer".into(),
                temperature: "-80C".into(),
                description: String::new(),
            })
            .unwrap();
        svc.locations
            .create(CreateLocationInput {
                name: "Bench A".into(),
                location_type: "shelf".into(),
                temperature: String::new(),
                description: String::new(),
            })
            .unwrap();

        let names: Vec<_> = svc.locations.list().unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Bench A", "Freezer B"]);
        assert_eq!(svc.locations.get(freezer.id).unwrap().unwrap().temperature, "-80C");
        assert!(matches!(
            svc.locations.create(CreateLocationInput {
                name: " ".into(),
                location_type: "shelf".into(),
                temperature: String::new(),
                description: String::new(),
            }),
            Err(LabError::InvalidInput(_))
        ));
    }
}
