use serde::{de::DeserializeOwned, Serialize};

/// Trait for types that can be stored in the database
pub trait Entity: Serialize + DeserializeOwned {}

// Blanket implementation for any type that meets the requirements
impl<T> Entity for T where T: Serialize + DeserializeOwned {}

/// An entity's type name, used as its table name and as the entity_type
/// recorded in the change log.
/// e.g. "crm::model::Company" -> "Company"
pub(crate) fn entity_type_name<T>() -> String {
    let full_name = std::any::type_name::<T>();
    full_name.split("::").last().unwrap_or(full_name).to_string()
}
