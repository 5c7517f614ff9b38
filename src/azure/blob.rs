//! Blob operations used by archive and restore.
//!
//! [`BlobClient`] talks to one container through the Azure storage SDK,
//! authorised by a SAS token. Workflows only see the [`BlobStore`] trait.

use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude as az;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTier {
    Hot,
    Cool,
    Cold,
    Archive,
}

impl AccessTier {
    pub fn is_online(&self) -> bool {
        !matches!(self, AccessTier::Archive)
    }
}

impl FromStr for AccessTier {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(AccessTier::Hot),
            "cool" => Ok(AccessTier::Cool),
            "cold" => Ok(AccessTier::Cold),
            "archive" => Ok(AccessTier::Archive),
            other => Err(format!("Unknown access tier '{other}'").into()),
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessTier::Hot => "Hot",
            AccessTier::Cool => "Cool",
            AccessTier::Cold => "Cold",
            AccessTier::Archive => "Archive",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehydratePriority {
    Standard,
    High,
}

impl FromStr for RehydratePriority {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(RehydratePriority::Standard),
            "high" => Ok(RehydratePriority::High),
            other => Err(format!("Unknown rehydrate priority '{other}'").into()),
        }
    }
}

impl fmt::Display for RehydratePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RehydratePriority::Standard => write!(f, "Standard"),
            RehydratePriority::High => write!(f, "High"),
        }
    }
}

/// The subset of blob properties the workflows look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub content_length: u64,
    pub access_tier: Option<AccessTier>,
    /// Target tier of a pending rehydration, from the archive status.
    pub rehydrating_to: Option<AccessTier>,
    pub rehydrate_priority: Option<RehydratePriority>,
}

impl BlobProperties {
    /// Build from the SDK's tier, archive status and priority names.
    ///
    /// Archive status is accepted as `rehydrate-pending-to-hot` or
    /// `RehydratePendingToHot`. Tiers without a counterpart here, such as
    /// premium page blob tiers, are left out.
    pub fn from_names(
        content_length: u64,
        access_tier: Option<&str>,
        archive_status: Option<&str>,
        rehydrate_priority: Option<&str>,
    ) -> Result<BlobProperties, Box<dyn Error>> {
        let access_tier = access_tier.and_then(|t| t.parse::<AccessTier>().ok());
        let rehydrating_to = match archive_status {
            Some(status) => {
                let flat = status.replace('-', "").to_ascii_lowercase();
                let target = flat
                    .strip_prefix("rehydratependingto")
                    .ok_or_else(|| format!("Unexpected archive status '{status}'"))?;
                Some(target.parse::<AccessTier>()?)
            }
            None => None,
        };
        let rehydrate_priority = rehydrate_priority
            .map(RehydratePriority::from_str)
            .transpose()?;

        Ok(BlobProperties {
            content_length,
            access_tier,
            rehydrating_to,
            rehydrate_priority,
        })
    }

    /// Readable now: online tier and no rehydration in flight.
    pub fn is_online(&self) -> bool {
        self.rehydrating_to.is_none() && self.access_tier.map_or(true, |t| t.is_online())
    }
}

/// Blob operations needed by the archive and restore workflows.
#[allow(async_fn_in_trait)]
pub trait BlobStore {
    /// `Ok(None)` when the blob does not exist.
    async fn get_properties(&self, name: &str) -> Result<Option<BlobProperties>, Box<dyn Error>>;

    async fn set_tier(
        &self,
        name: &str,
        tier: AccessTier,
        priority: Option<RehydratePriority>,
    ) -> Result<(), Box<dyn Error>>;

    async fn delete(&self, name: &str) -> Result<(), Box<dyn Error>>;

    /// URL (with SAS) handed to the copy tool.
    fn blob_url(&self, name: &str) -> Result<String, Box<dyn Error>>;
}

/// SDK client for one container.
pub struct BlobClient {
    container: az::ContainerClient,
    sas_token: String,
}

/// Account and container from `https://<account>.blob.core.windows.net/<container>`.
pub fn parse_container_url(container_url: &str) -> Result<(String, String), Box<dyn Error>> {
    let invalid = || format!("Invalid container URL '{container_url}'");
    let rest = container_url
        .strip_prefix("https://")
        .ok_or_else(invalid)?
        .split('?')
        .next()
        .unwrap_or_default();
    let (host, path) = rest.split_once('/').ok_or_else(invalid)?;
    let account = host
        .strip_suffix(".blob.core.windows.net")
        .filter(|a| !a.is_empty() && !a.contains('.'))
        .ok_or_else(invalid)?;
    let container = path.trim_matches('/');
    if container.is_empty() || container.contains('/') {
        return Err(invalid().into());
    }
    Ok((account.to_string(), container.to_string()))
}

impl BlobClient {
    pub fn new(container_url: &str, sas_token: &str) -> Result<BlobClient, Box<dyn Error>> {
        let (account, container) = parse_container_url(container_url)?;
        let sas_token = sas_token.trim_start_matches('?').to_string();
        let credentials = StorageCredentials::sas_token(sas_token.as_str())?;
        let container = az::ClientBuilder::new(account, credentials).container_client(container);
        Ok(BlobClient {
            container,
            sas_token,
        })
    }
}

impl BlobStore for BlobClient {
    async fn get_properties(&self, name: &str) -> Result<Option<BlobProperties>, Box<dyn Error>> {
        log::debug!("Get properties of blob {name}");
        let client = self.container.blob_client(name);
        if !client.exists().await? {
            return Ok(None);
        }
        let props = client.get_properties().await?.blob.properties;
        let access_tier = props.access_tier.map(|t| format!("{t:?}"));
        let archive_status = props.archive_status.map(|s| format!("{s:?}"));
        let priority = props.rehydrate_priority.map(|p| format!("{p:?}"));
        BlobProperties::from_names(
            props.content_length,
            access_tier.as_deref(),
            archive_status.as_deref(),
            priority.as_deref(),
        )
        .map(Some)
    }

    async fn set_tier(
        &self,
        name: &str,
        tier: AccessTier,
        priority: Option<RehydratePriority>,
    ) -> Result<(), Box<dyn Error>> {
        log::info!("Set tier of {name} to {tier} priority={priority:?}");
        let mut request = self
            .container
            .blob_client(name)
            .set_blob_tier(tier.to_string().parse()?);
        if let Some(p) = priority {
            request = request.rehydrate_priority(p.to_string().parse::<az::RehydratePriority>()?);
        }
        request
            .await
            .map_err(|e| format!("Set tier of {name} failed: {e}"))?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), Box<dyn Error>> {
        log::info!("Delete blob {name}");
        self.container
            .blob_client(name)
            .delete()
            .await
            .map_err(|e| format!("Delete of {name} failed: {e}"))?;
        Ok(())
    }

    fn blob_url(&self, name: &str) -> Result<String, Box<dyn Error>> {
        let mut url = self.container.blob_client(name).url()?;
        url.set_query(Some(self.sas_token.as_str()).filter(|q| !q.is_empty()));
        Ok(url.to_string())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory blob store for workflow tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeBlobStore {
        pub blobs: RefCell<HashMap<String, BlobProperties>>,
        /// Number of property reads before a pending rehydration completes.
        pub rehydrate_after_polls: usize,
        pub polls: RefCell<HashMap<String, usize>>,
        pub tier_calls: RefCell<Vec<(String, AccessTier)>>,
    }

    impl FakeBlobStore {
        pub fn with_blob(self, name: &str, len: u64, tier: AccessTier) -> Self {
            self.put(name, len, tier);
            self
        }

        pub fn put(&self, name: &str, len: u64, tier: AccessTier) {
            self.blobs.borrow_mut().insert(
                name.to_string(),
                BlobProperties {
                    content_length: len,
                    access_tier: Some(tier),
                    rehydrating_to: None,
                    rehydrate_priority: None,
                },
            );
        }
    }

    impl BlobStore for FakeBlobStore {
        async fn get_properties(
            &self,
            name: &str,
        ) -> Result<Option<BlobProperties>, Box<dyn Error>> {
            let mut blobs = self.blobs.borrow_mut();
            let Some(props) = blobs.get_mut(name) else {
                return Ok(None);
            };
            if let Some(target) = props.rehydrating_to {
                let mut polls = self.polls.borrow_mut();
                let n = polls.entry(name.to_string()).or_insert(0);
                *n += 1;
                if *n > self.rehydrate_after_polls {
                    props.access_tier = Some(target);
                    props.rehydrating_to = None;
                }
            }
            Ok(Some(props.clone()))
        }

        async fn set_tier(
            &self,
            name: &str,
            tier: AccessTier,
            priority: Option<RehydratePriority>,
        ) -> Result<(), Box<dyn Error>> {
            self.tier_calls.borrow_mut().push((name.to_string(), tier));
            let mut blobs = self.blobs.borrow_mut();
            let props = blobs.get_mut(name).ok_or("BlobNotFound")?;
            if props.access_tier == Some(AccessTier::Archive) && tier.is_online() {
                props.rehydrating_to = Some(tier);
                props.rehydrate_priority = priority;
            } else {
                props.access_tier = Some(tier);
            }
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<(), Box<dyn Error>> {
            self.blobs.borrow_mut().remove(name);
            Ok(())
        }

        fn blob_url(&self, name: &str) -> Result<String, Box<dyn Error>> {
            Ok(format!("https://fake.blob.core.windows.net/c/{name}?sig=x"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!("archive".parse::<AccessTier>().unwrap(), AccessTier::Archive);
        assert_eq!("Hot".parse::<AccessTier>().unwrap(), AccessTier::Hot);
        assert!("glacier".parse::<AccessTier>().is_err());
        assert_eq!(AccessTier::Cool.to_string(), "Cool");
        assert_eq!("HIGH".parse::<RehydratePriority>().unwrap(), RehydratePriority::High);
    }

    #[test]
    fn test_properties_from_names() {
        let p = BlobProperties::from_names(
            1024,
            Some("Archive"),
            Some("RehydratePendingToHot"),
            Some("Standard"),
        )
        .unwrap();
        assert_eq!(p.content_length, 1024);
        assert_eq!(p.access_tier, Some(AccessTier::Archive));
        assert_eq!(p.rehydrating_to, Some(AccessTier::Hot));
        assert_eq!(p.rehydrate_priority, Some(RehydratePriority::Standard));
        assert!(!p.is_online());

        let status = Some("rehydrate-pending-to-cool");
        let p = BlobProperties::from_names(5, Some("Archive"), status, None).unwrap();
        assert_eq!(p.rehydrating_to, Some(AccessTier::Cool));

        let p = BlobProperties::from_names(5, Some("Cool"), None, None).unwrap();
        assert!(p.is_online());

        // premium tiers are not ours
        let p = BlobProperties::from_names(5, Some("P10"), None, None).unwrap();
        assert_eq!(p.access_tier, None);
    }

    #[test]
    fn test_properties_bad_archive_status() {
        assert!(BlobProperties::from_names(1, Some("Archive"), Some("copying"), None).is_err());
    }

    #[test]
    fn test_parse_container_url() {
        assert_eq!(
            parse_container_url("https://acct.blob.core.windows.net/archive/").unwrap(),
            ("acct".to_string(), "archive".to_string())
        );
        assert!(parse_container_url("http://acct.blob.core.windows.net/archive").is_err());
        assert!(parse_container_url("https://acct.blob.core.windows.net/").is_err());
        assert!(parse_container_url("https://acct.blob.core.windows.net/a/b").is_err());
        assert!(parse_container_url("https://example.com/archive").is_err());
    }

    #[test]
    fn test_blob_url() {
        let c = BlobClient::new(
            "https://acct.blob.core.windows.net/archive/",
            "?sv=2022-11-02&sig=abc",
        )
        .unwrap();
        let url = c.blob_url("backups/proj/a.7z").unwrap();
        assert!(url.starts_with("https://acct.blob.core.windows.net/archive/"), "{url}");
        assert!(url.ends_with("/backups/proj/a.7z?sv=2022-11-02&sig=abc"), "{url}");
    }
}
