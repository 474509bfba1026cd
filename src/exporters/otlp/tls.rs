// SPDX-License-Identifier: Apache-2.0

use crate::exporters::otlp::errors::ExporterError;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

#[derive(Clone, Debug)]
pub(crate) enum FileType {
    File(String),
    Pem(String),
}

/// TLS settings for a secure collector connection.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    ca: Option<FileType>, // if absent, native roots are used
    cert: Option<FileType>,
    key: Option<FileType>,
    domain_name: Option<String>,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        Default::default()
    }

    /// Loads any referenced files and produces the tonic client configuration.
    pub(crate) fn client_config(&self) -> Result<ClientTlsConfig, ExporterError> {
        let mut config = ClientTlsConfig::new();
        config = match &self.ca {
            Some(ca) => config.ca_certificate(Certificate::from_pem(load(ca)?)),
            None => config.with_native_roots(),
        };

        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            config = config.identity(Identity::from_pem(load(cert)?, load(key)?));
        }

        if let Some(domain) = &self.domain_name {
            config = config.domain_name(domain.clone());
        }

        Ok(config)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TlsConfigBuilder {
    ca: Option<FileType>,
    cert: Option<FileType>,
    key: Option<FileType>,
    domain_name: Option<String>,
}

impl TlsConfigBuilder {
    pub fn with_cert_file(mut self, cert_file: String) -> Self {
        self.cert = Some(FileType::File(cert_file));
        self
    }

    pub fn with_cert_pem(mut self, cert_pem: String) -> Self {
        self.cert = Some(FileType::Pem(cert_pem));
        self
    }

    pub fn with_key_file(mut self, key_file: String) -> Self {
        self.key = Some(FileType::File(key_file));
        self
    }

    pub fn with_key_pem(mut self, key_pem: String) -> Self {
        self.key = Some(FileType::Pem(key_pem));
        self
    }

    pub fn with_ca_file(mut self, ca_file: String) -> Self {
        self.ca = Some(FileType::File(ca_file));
        self
    }

    pub fn with_ca_pem(mut self, ca_pem: String) -> Self {
        self.ca = Some(FileType::Pem(ca_pem));
        self
    }

    /// Overrides the name checked against the server certificate.
    pub fn with_domain_name(mut self, domain_name: String) -> Self {
        self.domain_name = Some(domain_name);
        self
    }

    pub fn build(self) -> Result<TlsConfig, ExporterError> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(ExporterError::Config(
                "Either both or neither of cert and key must be provided".to_string(),
            ));
        }

        let tls = TlsConfig {
            ca: self.ca,
            cert: self.cert,
            key: self.key,
            domain_name: self.domain_name,
        };
        // Surface unreadable files at configuration time rather than on first dial.
        tls.client_config()?;
        Ok(tls)
    }
}

fn load(file: &FileType) -> Result<String, ExporterError> {
    match file {
        FileType::File(f) => std::fs::read_to_string(f)
            .map_err(|e| ExporterError::Config(format!("unable to read {}: {}", f, e))),
        FileType::Pem(p) => Ok(p.clone()),
    }
}
