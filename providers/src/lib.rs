//! componentkit-providers: thin reference providers that pin the
//! `Operations` contract for kinds beyond the Helm reference
//! implementation, per spec §4.2's scope boundary — each deep enough to
//! be real, none a full subsystem.

pub mod config_reader;
pub mod iam_policy;
pub mod iam_role;
pub mod manifest;
pub mod secret_push;

pub use config_reader::ConfigReaderOperationsFactory;
pub use iam_policy::IamPolicyOperationsFactory;
pub use iam_role::IamRoleOperationsFactory;
pub use manifest::ManifestOperationsFactory;
pub use secret_push::SecretPushOperationsFactory;
