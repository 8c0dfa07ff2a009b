//! Milvus RESTful v2 request and response bodies.

use crate::config::MilvusConfig;
use facematch_core::MAX_NAME_BYTES;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub(crate) const NAME_FIELD: &str = "name";
pub(crate) const VECTOR_FIELD: &str = "embedding";
/// Milvus caps `offset + limit` of a query at 16384 rows.
pub(crate) const QUERY_LIMIT: usize = 16_384;

/// Every v2 response: `code` 0 on success, otherwise `message` explains.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectionRequest<'a> {
    pub collection_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HasCollection {
    pub has: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionDescription {
    #[serde(default)]
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldDescription {
    pub name: String,
    #[serde(default)]
    pub params: Vec<FieldParam>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldParam {
    pub key: String,
    pub value: Value,
}

impl CollectionDescription {
    /// Declared dimension of the descriptor field, if the collection has one.
    pub fn vector_dim(&self) -> Option<usize> {
        let field = self.fields.iter().find(|f| f.name == VECTOR_FIELD)?;
        let param = field.params.iter().find(|p| p.key == "dim")?;
        match &param.value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertRequest<'a> {
    pub collection_name: &'a str,
    pub data: Vec<InsertRow<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InsertRow<'a> {
    pub name: &'a str,
    pub embedding: &'a [f32],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertResult {
    #[serde(default)]
    pub insert_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchRequest<'a> {
    pub collection_name: &'a str,
    pub data: [&'a [f32]; 1],
    pub anns_field: &'static str,
    pub limit: usize,
    pub output_fields: [&'static str; 2],
    pub search_params: Value,
}

/// One search hit: the requested output fields plus `distance`.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchHit {
    pub distance: f32,
    pub name: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest<'a> {
    pub collection_name: &'a str,
    pub filter: &'static str,
    pub output_fields: [&'static str; 1],
    pub limit: usize,
}

/// One `entities/query` row with only the name projected.
#[derive(Debug, Deserialize)]
pub(crate) struct NameRow {
    pub name: String,
}

/// Body for `collections/create`: auto-id primary key, name, descriptor, and
/// the vector index built alongside so the collection can be loaded at once.
pub(crate) fn create_collection_body(config: &MilvusConfig) -> Value {
    json!({
        "collectionName": config.collection,
        "description": "Face embeddings collection",
        "schema": {
            "autoId": true,
            "enableDynamicField": false,
            "fields": [
                { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                {
                    "fieldName": NAME_FIELD,
                    "dataType": "VarChar",
                    "elementTypeParams": { "max_length": MAX_NAME_BYTES }
                },
                {
                    "fieldName": VECTOR_FIELD,
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": config.dim }
                }
            ]
        },
        "indexParams": [{
            "fieldName": VECTOR_FIELD,
            "indexName": format!("{VECTOR_FIELD}_idx"),
            "indexType": config.index_type.as_str(),
            "metricType": config.metric.to_ascii_uppercase(),
            "params": config.build_params()
        }]
    })
}

pub(crate) fn search_body<'a>(config: &'a MilvusConfig, query: &'a [f32], limit: usize) -> SearchRequest<'a> {
    SearchRequest {
        collection_name: &config.collection,
        data: [query],
        anns_field: VECTOR_FIELD,
        limit,
        output_fields: [NAME_FIELD, VECTOR_FIELD],
        search_params: json!({
            "metricType": config.metric.to_ascii_uppercase(),
            "params": config.search_params()
        }),
    }
}

/// Scalar query returning every stored name. An empty filter matches all rows.
pub(crate) fn query_names_body(config: &MilvusConfig) -> QueryRequest<'_> {
    QueryRequest {
        collection_name: &config.collection,
        filter: "",
        output_fields: [NAME_FIELD],
        limit: QUERY_LIMIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_names_body_shape() {
        let config = MilvusConfig::default();
        let body = serde_json::to_value(query_names_body(&config)).unwrap();
        assert_eq!(body, json!({
            "collectionName": "faces",
            "filter": "",
            "outputFields": ["name"],
            "limit": 16384
        }));
    }

    #[test]
    fn test_create_body_schema() {
        let body = create_collection_body(&MilvusConfig::default());
        assert_eq!(body["collectionName"], "faces");
        let fields = body["schema"]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2]["elementTypeParams"]["dim"], 128);
        assert_eq!(fields[1]["elementTypeParams"]["max_length"], 100);
        assert_eq!(body["indexParams"][0]["indexType"], "IVF_FLAT");
        assert_eq!(body["indexParams"][0]["metricType"], "L2");
        assert_eq!(body["indexParams"][0]["params"]["nlist"], 128);
    }

    #[test]
    fn test_search_body_shape() {
        let config = MilvusConfig::default();
        let query = [0.5f32, 0.25];
        let body = serde_json::to_value(search_body(&config, &query, 1)).unwrap();
        assert_eq!(body["collectionName"], "faces");
        assert_eq!(body["annsField"], "embedding");
        assert_eq!(body["limit"], 1);
        assert_eq!(body["data"][0][1], 0.25);
        assert_eq!(body["outputFields"], json!(["name", "embedding"]));
        assert_eq!(body["searchParams"]["params"]["nprobe"], 10);
    }

    #[test]
    fn test_insert_body_shape() {
        let embedding = [1.0f32, 2.0];
        let body = serde_json::to_value(InsertRequest {
            collection_name: "faces",
            data: vec![InsertRow {
                name: "ann",
                embedding: &embedding,
            }],
        })
        .unwrap();
        assert_eq!(body, json!({
            "collectionName": "faces",
            "data": [{ "name": "ann", "embedding": [1.0, 2.0] }]
        }));
    }

    #[test]
    fn test_vector_dim_from_string_param() {
        let desc: CollectionDescription = serde_json::from_value(json!({
            "fields": [
                { "name": "id", "type": "Int64", "primaryKey": true },
                { "name": "embedding", "type": "FloatVector",
                  "params": [{ "key": "dim", "value": "128" }] }
            ]
        }))
        .unwrap();
        assert_eq!(desc.vector_dim(), Some(128));
    }

    #[test]
    fn test_vector_dim_missing_field() {
        let desc: CollectionDescription = serde_json::from_value(json!({
            "fields": [{ "name": "vec", "type": "FloatVector" }]
        }))
        .unwrap();
        assert_eq!(desc.vector_dim(), None);
    }

    #[test]
    fn test_error_envelope() {
        let env: Envelope<Value> =
            serde_json::from_str(r#"{"code":1100,"message":"collection not found"}"#).unwrap();
        assert_eq!(env.code, 1100);
        assert_eq!(env.message.as_deref(), Some("collection not found"));
        assert!(env.data.is_none());
    }

    #[test]
    fn test_search_hits_parse() {
        let env: Envelope<Vec<SearchHit>> = serde_json::from_str(
            r#"{"code":0,"data":[{"distance":0.12,"id":42,"name":"ann","embedding":[0.1,0.2]}]}"#,
        )
        .unwrap();
        let hits = env.data.unwrap();
        assert_eq!(hits[0].name, "ann");
        assert!((hits[0].distance - 0.12).abs() < 1e-6);
        assert_eq!(hits[0].embedding.len(), 2);
    }
}
