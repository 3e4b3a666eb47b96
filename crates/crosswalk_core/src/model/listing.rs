//! Wire shapes returned by an environment's read endpoints.
//!
//! Field names follow the platform's camelCase payloads so listings can be
//! deserialized straight from response bodies.

use serde::{Deserialize, Serialize};

/// Subform field type marker used by form definitions.
pub const SUBFORM_FIELD_TYPE: &str = "subForm";

/// One row of the "list protocols" endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolListing {
    pub id: i64,
    pub short_title: String,
    #[serde(default)]
    pub title: String,
}

/// One row of the "list protocol groups" endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolGroupListing {
    pub id: i64,
    pub name: String,
}

/// One row of the "list forms" endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormListing {
    pub form_id: i64,
    pub caption: String,
    /// Environment-local short name.
    pub name: String,
    #[serde(default)]
    pub modification_time: Option<i64>,
    #[serde(default)]
    pub creation_time: Option<i64>,
}

impl FormListing {
    /// Modification time when present, creation time otherwise.
    pub fn update_record(&self) -> Option<i64> {
        self.modification_time.or(self.creation_time)
    }
}

/// Field layout of one form, as nested rows of field definitions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormDefinition {
    #[serde(default)]
    pub rows: Vec<Vec<FieldDefinition>>,
}

impl FormDefinition {
    /// Flattens rows into declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.rows.iter().flatten()
    }
}

/// One field definition; subforms carry their own nested rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Environment-local code used in write payloads.
    pub name: String,
    pub caption: String,
    #[serde(default)]
    pub udn: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub rows: Option<Vec<Vec<FieldDefinition>>>,
}

impl FieldDefinition {
    pub fn is_sub_form(&self) -> bool {
        self.field_type == SUBFORM_FIELD_TYPE
    }

    /// Nested fields of a subform, flattened. Empty for plain fields.
    pub fn sub_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.rows.iter().flatten().flatten()
    }
}

/// One dropdown attribute with its permissible-value count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropdownListing {
    pub attribute: String,
    #[serde(default)]
    pub pv_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{FormDefinition, FormListing};
    use serde_json::json;

    #[test]
    fn form_listing_prefers_modification_time() {
        let listing: FormListing = serde_json::from_value(json!({
            "formId": 7,
            "caption": "Demographics",
            "name": "demo",
            "creationTime": 100,
            "modificationTime": 200
        }))
        .unwrap();
        assert_eq!(listing.update_record(), Some(200));

        let created_only = FormListing {
            modification_time: None,
            ..listing
        };
        assert_eq!(created_only.update_record(), Some(100));
    }

    #[test]
    fn definition_flattens_rows_and_subform_rows() {
        let definition: FormDefinition = serde_json::from_value(json!({
            "rows": [
                [{"name": "RC", "caption": "Race", "udn": "race", "type": "listbox"}],
                [{
                    "name": "FH",
                    "caption": "FamilyHistory",
                    "udn": "familyHistory",
                    "type": "subForm",
                    "rows": [[
                        {"name": "REL", "caption": "Relation", "type": "text"},
                        {"name": "COND", "caption": "Condition", "type": "text"}
                    ]]
                }]
            ]
        }))
        .unwrap();

        let captions: Vec<_> = definition.fields().map(|f| f.caption.as_str()).collect();
        assert_eq!(captions, vec!["Race", "FamilyHistory"]);
        let subform = definition.fields().nth(1).unwrap();
        assert!(subform.is_sub_form());
        assert_eq!(subform.sub_fields().count(), 2);
    }
}
