//! Rendering of stored submissions into the flat dictionaries the data API
//! returns: answers keyed by question path, plus `_`-prefixed metadata.

use serde_json::{Map, Value, json};

use crate::models::{AttachmentInfo, Instance, XForm};

/// Everything needed to build absolute URLs for one form's records.
pub struct RenderContext<'a> {
    pub base_url: &'a str,
    pub owner: &'a str,
    pub xform: &'a XForm,
}

impl RenderContext<'_> {
    pub fn record_url(&self, instance_id: i64) -> String {
        format!(
            "{}/api/v1/data/{}/{}/{}",
            self.base_url, self.owner, self.xform.id, instance_id
        )
    }

    pub fn render(&self, instance: &Instance, attachments: &[AttachmentInfo]) -> Map<String, Value> {
        let mut dict = match &instance.json {
            Value::Object(answers) => answers.clone(),
            _ => Map::new(),
        };

        let attachments: Vec<Value> = attachments
            .iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "filename": a.filename,
                    "mimetype": a.mimetype,
                    "size": a.size,
                    "download_url": format!("{}/attachments/{}", self.record_url(instance.id), a.id),
                })
            })
            .collect();

        dict.insert("_id".into(), json!(instance.id));
        dict.insert("_uuid".into(), json!(instance.uuid));
        dict.insert("_xform_id_string".into(), json!(self.xform.id_string));
        dict.insert("_status".into(), json!(instance.status));
        dict.insert("_bamboo_dataset_id".into(), json!(self.xform.bamboo_dataset));
        dict.insert("_attachments".into(), Value::Array(attachments));
        dict.insert(
            "_geolocation".into(),
            json!([instance.latitude, instance.longitude]),
        );
        dict.insert("_tags".into(), json!(instance.tags));
        dict.insert(
            "_submission_time".into(),
            json!(instance.created_at.to_rfc3339()),
        );
        dict.insert("_submitted_by".into(), json!(instance.submitter));
        dict.insert(
            "_deleted_at".into(),
            json!(instance.deleted_at.map(|t| t.to_rfc3339())),
        );

        dict
    }
}

/// Reduce a rendered dictionary to `fields`; `_id` is always kept.
pub fn project(dict: Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    dict.into_iter()
        .filter(|(key, _)| key == "_id" || fields.iter().any(|f| f == key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn xform() -> XForm {
        XForm {
            id: 3,
            user_id: Uuid::now_v7(),
            id_string: "transportation_2011_07_25".into(),
            title: "Transportation".into(),
            description: String::new(),
            fields: Json(Vec::new()),
            shared_data: false,
            downloadable: true,
            bamboo_dataset: String::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn instance() -> Instance {
        Instance {
            id: 11,
            xform_id: 3,
            submitted_by: None,
            uuid: "5b2cc313-fc09-437e-8149-fcd32f695d41".into(),
            json: json!({
                "transport/available_transportation_types_to_referral_facility": "none"
            }),
            status: "submitted_via_web".into(),
            latitude: None,
            longitude: None,
            tags: vec!["hello".into()],
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            submitter: None,
        }
    }

    #[test]
    fn dictionary_carries_answers_and_metadata() {
        let form = xform();
        let ctx = RenderContext {
            base_url: "http://testserver",
            owner: "bob",
            xform: &form,
        };
        let dict = ctx.render(&instance(), &[]);

        assert_eq!(
            dict["transport/available_transportation_types_to_referral_facility"],
            json!("none")
        );
        assert_eq!(dict["_id"], json!(11));
        assert_eq!(dict["_bamboo_dataset_id"], json!(""));
        assert_eq!(dict["_attachments"], json!([]));
        assert_eq!(dict["_geolocation"], json!([null, null]));
        assert_eq!(dict["_xform_id_string"], json!("transportation_2011_07_25"));
        assert_eq!(dict["_status"], json!("submitted_via_web"));
        assert_eq!(dict["_tags"], json!(["hello"]));
        assert_eq!(dict["_deleted_at"], Value::Null);
    }

    #[test]
    fn attachments_link_back_to_the_record() {
        let form = xform();
        let ctx = RenderContext {
            base_url: "http://testserver",
            owner: "bob",
            xform: &form,
        };
        let attachment = AttachmentInfo {
            id: 4,
            instance_id: 11,
            filename: "photo.jpg".into(),
            mimetype: "image/jpeg".into(),
            size: 10,
        };
        let dict = ctx.render(&instance(), &[attachment]);
        assert_eq!(
            dict["_attachments"][0]["download_url"],
            json!("http://testserver/api/v1/data/bob/3/11/attachments/4")
        );
    }

    #[test]
    fn projection_keeps_id() {
        let form = xform();
        let ctx = RenderContext {
            base_url: "",
            owner: "bob",
            xform: &form,
        };
        let dict = project(ctx.render(&instance(), &[]), &["_status".to_string()]);
        assert_eq!(dict.len(), 2);
        assert!(dict.contains_key("_id"));
        assert!(dict.contains_key("_status"));
    }
}
