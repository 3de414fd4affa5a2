//! Native libvirt connection via the `virt` crate.
//!
//! Compiled only with the `libvirt` cargo feature. Without it a stub is
//! provided whose [`LibvirtClient::connect`] always fails, so callers can be
//! written unconditionally.

// ---------------------------------------------------------------------------
// libvirt implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "libvirt")]
mod imp {
    use async_trait::async_trait;
    use tracing::{info, warn};
    use virt::connect::Connect;
    use virt::domain::Domain;

    use crate::error::{BackupError, Result};
    use crate::vm::Hypervisor;

    /// An open hypervisor connection. Closed when dropped, on every exit
    /// path of the run that owns it.
    pub struct LibvirtClient {
        uri: String,
        connection: Connect,
    }

    impl LibvirtClient {
        pub fn connect(uri: &str) -> Result<Self> {
            info!(uri = %uri, "Connecting to libvirt");
            let connection = Connect::open(Some(uri)).map_err(|e| BackupError::Connection {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
            info!("Connected to libvirt");
            Ok(Self {
                uri: uri.to_string(),
                connection,
            })
        }
    }

    #[async_trait]
    impl Hypervisor for LibvirtClient {
        type Domain = Domain;

        async fn lookup(&self, name: &str) -> Result<Domain> {
            Domain::lookup_by_name(&self.connection, name).map_err(|e| BackupError::VmNotFound {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }

        async fn descriptor(&self, domain: &Domain) -> Result<String> {
            domain.get_xml_desc(0).map_err(|e| BackupError::Descriptor {
                reason: e.to_string(),
            })
        }
    }

    impl Drop for LibvirtClient {
        fn drop(&mut self) {
            match self.connection.close() {
                Ok(_) => info!(uri = %self.uri, "Closed libvirt connection"),
                Err(e) => warn!(uri = %self.uri, error = %e, "Failed to close libvirt connection"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stub without the `libvirt` feature
// ---------------------------------------------------------------------------

#[cfg(not(feature = "libvirt"))]
mod imp {
    use async_trait::async_trait;

    use crate::error::{BackupError, Result};
    use crate::vm::Hypervisor;

    /// Placeholder client; never constructed.
    pub struct LibvirtClient {
        _private: (),
    }

    impl LibvirtClient {
        pub fn connect(uri: &str) -> Result<Self> {
            Err(BackupError::Connection {
                uri: uri.to_string(),
                reason: "built without the `libvirt` feature; use backend = \"virsh\"".to_string(),
            })
        }
    }

    #[async_trait]
    impl Hypervisor for LibvirtClient {
        type Domain = ();

        async fn lookup(&self, name: &str) -> Result<()> {
            Err(BackupError::VmNotFound {
                name: name.to_string(),
                reason: "libvirt support not compiled in".to_string(),
            })
        }

        async fn descriptor(&self, _domain: &()) -> Result<String> {
            Err(BackupError::Descriptor {
                reason: "libvirt support not compiled in".to_string(),
            })
        }
    }
}

pub use imp::LibvirtClient;
