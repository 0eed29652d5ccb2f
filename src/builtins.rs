//! Accessors installed at initialization for common FamilySearch payloads.

use crate::registry::{ConvenienceRegistry, Kind};
use serde_json::Value;

const GIVEN_NAME_TYPE: &str = "http://gedcomx.org/Given";
const SURNAME_TYPE: &str = "http://gedcomx.org/Surname";

pub(crate) fn install(registry: &ConvenienceRegistry) {
    registry.register(&Kind::GEDCOMX, "persons", |p| field(p, "persons"));
    registry.register(&Kind::GEDCOMX, "relationships", |p| field(p, "relationships"));
    registry.register(&Kind::GEDCOMX, "child_and_parents_relationships", |p| {
        field(p, "childAndParentsRelationships")
    });
    registry.register(&Kind::GEDCOMX, "source_descriptions", |p| {
        field(p, "sourceDescriptions")
    });

    registry.register(&Kind::PERSON_RESPONSE, "person", |p| first(p, "persons"));
    registry.relate(&Kind::PERSON_RESPONSE, &Kind::GEDCOMX);

    registry.register(&Kind::RELATIONSHIP_RESPONSE, "relationship", |p| {
        first(p, "relationships").or_else(|| first(p, "childAndParentsRelationships"))
    });
    registry.relate(&Kind::RELATIONSHIP_RESPONSE, &Kind::GEDCOMX);

    registry.register(&Kind::SOURCE_RESPONSE, "source_description", |p| {
        first(p, "sourceDescriptions")
    });
    registry.relate(&Kind::SOURCE_RESPONSE, &Kind::GEDCOMX);

    registry.register(&Kind::USER_RESPONSE, "user", |p| first(p, "users"));

    registry.register(&Kind::PERSON, "id", |p| field(p, "id"));
    registry.register(&Kind::PERSON, "display_name", |p| {
        p.pointer("/display/name").cloned()
    });
    registry.register(&Kind::PERSON, "lifespan", |p| {
        p.pointer("/display/lifespan").cloned()
    });
    registry.register(&Kind::PERSON, "gender", |p| p.pointer("/gender/type").cloned());
    registry.register(&Kind::PERSON, "facts", |p| field(p, "facts"));
    registry.register(&Kind::PERSON, "given_name", |p| name_part(p, GIVEN_NAME_TYPE));
    registry.register(&Kind::PERSON, "surname", |p| name_part(p, SURNAME_TYPE));
}

fn field(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key).cloned()
}

fn first(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key)?.as_array()?.first().cloned()
}

/// Finds a name part of `part_type` in the preferred name, falling back to
/// the first name.
fn name_part(person: &Value, part_type: &str) -> Option<Value> {
    let names = person.get("names")?.as_array()?;
    let name = names
        .iter()
        .find(|n| n.get("preferred").and_then(Value::as_bool) == Some(true))
        .or_else(|| names.first())?;

    name.pointer("/nameForms/0/parts")?
        .as_array()?
        .iter()
        .find(|part| part.get("type").and_then(Value::as_str) == Some(part_type))?
        .get("value")
        .cloned()
}
