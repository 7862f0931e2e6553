//! Request-scoped context passed explicitly into every orchestrator call.

use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actor {
    Guest,
    Buyer(Uuid),
    Producer(Uuid),
    Admin(Uuid),
}

impl Actor {
    pub fn role(&self) -> &'static str {
        match self { Self::Guest => "guest", Self::Buyer(_) => "buyer", Self::Producer(_) => "producer", Self::Admin(_) => "admin" }
    }

    pub fn buyer_id(&self) -> Option<Uuid> {
        match self { Self::Buyer(id) => Some(*id), _ => None }
    }

    pub fn producer_id(&self) -> Option<Uuid> {
        match self { Self::Producer(id) => Some(*id), _ => None }
    }

    pub fn is_admin(&self) -> bool { matches!(self, Self::Admin(_)) }

    /// Builds an actor from the role/id pair the auth layer forwards.
    pub fn from_parts(role: &str, id: Option<&str>) -> Result<Self, ActorError> {
        if role.eq_ignore_ascii_case("guest") {
            return Ok(Self::Guest);
        }
        let id = id.ok_or(ActorError::MissingId)?;
        let id = Uuid::parse_str(id.trim()).map_err(|_| ActorError::MalformedId)?;
        match role.to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer(id)),
            "producer" => Ok(Self::Producer(id)),
            "admin" => Ok(Self::Admin(id)),
            _ => Err(ActorError::UnknownRole(role.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    #[error("unknown actor role `{0}`")]
    UnknownRole(String),
    #[error("actor id is required for this role")]
    MissingId,
    #[error("actor id is not a valid uuid")]
    MalformedId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: Actor,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self { Self { request_id: Uuid::now_v7().to_string(), actor } }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}
