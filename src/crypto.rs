// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;

/// Installs the process-wide rustls provider used by secure collector channels. Safe to
/// call more than once.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_none() {
        // Another thread may win the race to install, which is fine as long as one is set.
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            if CryptoProvider::get_default().is_none() {
                return Err(format!("failed to initialize crypto library: {:?}", e).into());
            }
        }
    }
    Ok(())
}
