use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::perms::{Principal, SessionId, TownMembership};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Town {
    pub name: String,
    pub nation: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbTown {
    pub name: String,
    pub nation: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbTown> for Town {
    fn from(value: DbTown) -> Self {
        Town {
            name: value.name,
            nation: value.nation,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TownUpsertRequest {
    #[serde(default)]
    pub nation: Option<String>,
}

/// Resident row joined with its town's nation
#[derive(Debug, Clone)]
pub struct DbResident {
    pub id: Uuid,
    pub name: String,
    pub town: Option<String>,
    pub nation: Option<String>,
    pub mayor: bool,
    pub king: bool,
    pub session_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl DbResident {
    pub fn into_principal(self, town_ranks: Vec<String>, nation_ranks: Vec<String>) -> Principal {
        Principal {
            id: self.id,
            name: self.name,
            town: self.town.map(|name| TownMembership { name, nation: self.nation }),
            mayor: self.mayor,
            king: self.king,
            town_ranks,
            nation_ranks,
            session: self.session_id.map(SessionId),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResidentUpsertRequest {
    pub name: String,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub mayor: bool,
    #[serde(default)]
    pub king: bool,
    #[serde(default)]
    pub town_ranks: Vec<String>,
    #[serde(default)]
    pub nation_ranks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResidentResponse {
    #[serde(flatten)]
    pub resident: Principal,
    pub attached: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub principal_id: Uuid,
    pub session: Option<SessionId>,
    pub attached: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub node: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub session: SessionId,
    pub node: String,
    /// `None` when the node is neither attached nor implied
    pub granted: Option<bool>,
}
