//! Clinic commands layered on [`RpcClient::call`].
//!
//! Each command is sent as a JSON array `[name, args...]`. Results come back
//! as opaque JSON; turning them into client/patient/visit records is the
//! domain layer's job.

use serde_json::{json, Value};

use crate::rpc::RpcClient;
use crate::types::{Error, RecordId, Result};

/// Build the `[name, args...]` payload for a command.
pub fn command_payload(name: &str, args: Vec<Value>) -> Value {
    let mut payload = Vec::with_capacity(args.len() + 1);
    payload.push(Value::String(name.to_string()));
    payload.extend(args);
    Value::Array(payload)
}

/// Give `record` a fresh id if its `id` field is missing or null.
///
/// Returns `true` when an id was assigned, i.e. the record is new.
pub fn ensure_record_id(record: &mut Value) -> Result<bool> {
    let fields = record
        .as_object_mut()
        .ok_or_else(|| Error::validation("record must be a JSON object"))?;
    match fields.get("id") {
        None | Some(Value::Null) => {
            let id = RecordId::generate();
            fields.insert("id".to_string(), Value::String(id.to_string()));
            Ok(true)
        }
        Some(_) => Ok(false),
    }
}

impl RpcClient {
    /// Issue `name` with `args` and wait for its result.
    pub async fn command(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.call(command_payload(name, args)).await
    }

    pub async fn search(&self, query: &str) -> Result<Value> {
        self.command("search", vec![json!(query)]).await
    }

    pub async fn show_upcoming(&self) -> Result<Value> {
        self.command("show-upcoming", vec![]).await
    }

    pub async fn get_clients(&self, ids: &[String]) -> Result<Value> {
        self.command("get-clients", vec![json!(ids)]).await
    }

    pub async fn get_patients(&self, ids: &[String]) -> Result<Value> {
        self.command("get-patients", vec![json!(ids)]).await
    }

    /// Save a patient, assigning an id if it has none, and add it as a pet
    /// of each client in `client_ids`.
    pub async fn save_patient(&self, patient: &mut Value, client_ids: &[String]) -> Result<Value> {
        let new_doc = ensure_record_id(patient)?;
        self.command(
            "save-patient",
            vec![patient.clone(), json!(client_ids), json!(new_doc)],
        )
        .await
    }

    pub async fn save_client(&self, client: &mut Value) -> Result<Value> {
        let new_doc = ensure_record_id(client)?;
        self.command("save-client", vec![client.clone(), json!(new_doc)])
            .await
    }

    pub async fn save_visit(&self, visit: &mut Value) -> Result<Value> {
        let new_doc = ensure_record_id(visit)?;
        self.command("save-visit", vec![visit.clone(), json!(new_doc)])
            .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Value> {
        self.command("login", vec![json!(username), json!(password)])
            .await
    }

    pub async fn logout(&self) -> Result<Value> {
        self.command("logout", vec![]).await
    }

    pub async fn clear(&self) -> Result<Value> {
        self.command("clear", vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transport::memory::MemoryConnector;
    use crate::types::{ClientConfig, ErrorKind};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_command_payload() {
        assert_eq!(command_payload("logout", vec![]), json!(["logout"]));
        assert_eq!(
            command_payload("login", vec![json!("vet"), json!("hunter2")]),
            json!(["login", "vet", "hunter2"])
        );
    }

    #[test]
    fn test_ensure_record_id() {
        let mut fresh = json!({"name": "Rex"});
        assert!(ensure_record_id(&mut fresh).unwrap());
        assert_eq!(fresh["id"].as_str().unwrap().len(), 32);

        let mut null_id = json!({"id": null});
        assert!(ensure_record_id(&mut null_id).unwrap());
        assert!(null_id["id"].is_string());

        let mut existing = json!({"id": "abc", "name": "Rex"});
        assert!(!ensure_record_id(&mut existing).unwrap());
        assert_eq!(existing["id"], json!("abc"));

        let err = ensure_record_id(&mut json!(["not", "a", "record"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_save_client_sends_new_doc_flag() {
        let (connector, mut peers) = MemoryConnector::accepting();
        let client = Arc::new(RpcClient::with_connector(ClientConfig::default(), connector));
        client.connect_to("mem://clinic").await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                let mut record = json!({"name": "Ada"});
                let result = client.save_client(&mut record).await;
                (record, result)
            })
        };

        let request = peer.recv_envelope().await;
        let payload = &request["m"];
        assert_eq!(payload[0], json!("save-client"));
        assert_eq!(payload[1]["name"], json!("Ada"));
        assert_eq!(payload[2], json!(true));
        peer.reply(1, json!("saved"));

        let (record, result) = task.await.unwrap();
        assert_eq!(result.unwrap(), json!("saved"));
        assert_eq!(record["id"], payload[1]["id"]);
    }

    #[tokio::test]
    async fn test_search_payload() {
        let (connector, mut peers) = MemoryConnector::accepting();
        let client = Arc::new(RpcClient::with_connector(ClientConfig::default(), connector));
        client.connect_to("mem://clinic").await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.search("rex").await })
        };
        assert_eq!(
            peer.recv_envelope().await,
            json!({"i": 1, "m": ["search", "rex"]})
        );
        peer.reply(1, json!([]));
        assert_eq!(task.await.unwrap().unwrap(), json!([]));
    }
}
