//! Secret materialization for bound credentials
//!
//! A successful bind produces two secrets, both owner-referenced to the
//! binding so deletion cascades: the raw credentials secret (named by the
//! binding GUID, full broker payload under one key) and the derived
//! workload-projection secret (`<guid>-sbio`, flattened key/value entries
//! plus a `type` entry, typed so workload tooling recognizes it).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use gantry_common::crd::GantryServiceBinding;
use gantry_common::{Error, Result};

use crate::broker::Credentials;

/// Secret type tag on the workload-projection secret
pub(crate) const BINDING_SECRET_TYPE: &str = "servicebinding.gantry.dev/managed";

/// The binding kind recorded in the projection's `type` entry
const BINDING_PROVIDER_TYPE: &str = "managed";

/// Name of the derived projection secret for a binding GUID
pub(crate) fn binding_secret_name(binding_guid: &str) -> String {
    format!("{binding_guid}-sbio")
}

/// The raw credentials secret: full broker payload under one key
pub(crate) fn credentials_secret(
    binding: &GantryServiceBinding,
    credentials: &Credentials,
) -> Result<Secret> {
    let payload = serde_json::to_vec(credentials)
        .map_err(|e| Error::internal_with_context("credentials", e.to_string()))?;
    Ok(Secret {
        metadata: owned_metadata(binding, binding.name_any()),
        data: Some(BTreeMap::from([(
            "credentials".to_string(),
            ByteString(payload),
        )])),
        ..Default::default()
    })
}

/// The workload-projection secret: flattened entries plus `type`
///
/// String values project as-is; anything structured is JSON-encoded, since
/// secret values are flat bytes.
pub(crate) fn projection_secret(
    binding: &GantryServiceBinding,
    credentials: &Credentials,
) -> Result<Secret> {
    let mut data = BTreeMap::new();
    for (key, value) in credentials {
        let bytes = match value {
            serde_json::Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other)
                .map_err(|e| Error::internal_with_context("credentials", e.to_string()))?,
        };
        data.insert(key.clone(), ByteString(bytes));
    }
    data.insert(
        "type".to_string(),
        ByteString(BINDING_PROVIDER_TYPE.as_bytes().to_vec()),
    );

    Ok(Secret {
        metadata: owned_metadata(binding, binding_secret_name(&binding.name_any())),
        type_: Some(BINDING_SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    })
}

fn owned_metadata(binding: &GantryServiceBinding, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: binding.namespace(),
        owner_references: Some(vec![OwnerReference {
            api_version: GantryServiceBinding::api_version(&()).into_owned(),
            kind: GantryServiceBinding::kind(&()).into_owned(),
            name: binding.name_any(),
            uid: binding.uid().unwrap_or_default(),
            controller: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_common::crd::GantryServiceBindingSpec;
    use gantry_common::ObjectRef;

    fn binding() -> GantryServiceBinding {
        let mut binding = GantryServiceBinding::new(
            "binding-guid",
            GantryServiceBindingSpec {
                service_ref: ObjectRef::new("instance-1"),
                app_ref: ObjectRef::new("app-1"),
                display_name: None,
            },
        );
        binding.metadata.namespace = Some("space-ns".to_string());
        binding.metadata.uid = Some("uid-1".to_string());
        binding
    }

    fn creds() -> Credentials {
        Credentials::from([
            (
                "uri".to_string(),
                serde_json::Value::String("postgres://db".to_string()),
            ),
            ("port".to_string(), serde_json::json!(5432)),
        ])
    }

    #[test]
    fn test_credentials_secret_holds_full_payload() {
        let secret = credentials_secret(&binding(), &creds()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("binding-guid"));
        let data = secret.data.unwrap();
        let payload: Credentials = serde_json::from_slice(&data["credentials"].0).unwrap();
        assert_eq!(payload, creds());
    }

    #[test]
    fn test_projection_secret_flattens_and_types() {
        let secret = projection_secret(&binding(), &creds()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("binding-guid-sbio"));
        assert_eq!(secret.type_.as_deref(), Some(BINDING_SECRET_TYPE));
        let data = secret.data.unwrap();
        assert_eq!(data["uri"].0, b"postgres://db".to_vec());
        assert_eq!(data["port"].0, b"5432".to_vec());
        assert_eq!(data["type"].0, b"managed".to_vec());
    }

    #[test]
    fn test_both_secrets_are_owned_by_the_binding() {
        for secret in [
            credentials_secret(&binding(), &creds()).unwrap(),
            projection_secret(&binding(), &creds()).unwrap(),
        ] {
            let owners = secret.metadata.owner_references.unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].kind, "GantryServiceBinding");
            assert_eq!(owners[0].name, "binding-guid");
            assert_eq!(owners[0].controller, Some(true));
        }
    }
}
