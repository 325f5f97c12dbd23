//! Payment provider commands.

use emporium_storefront::payments::PaymentsClient;

use super::{CommandError, backend_client, print_json};

/// List the payment providers the backend offers.
pub async fn providers() -> Result<(), CommandError> {
    let client = PaymentsClient::new(backend_client()?);
    let providers = client.providers(None).await?;
    tracing::info!(count = providers.len(), "Fetched payment providers");
    print_json(&providers)
}
