use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::PathBuf;

use url::Url;

use crate::codec::{encode_labels, EncodedLabels, LabelCodecError};

pub const DEFAULT_BUCKET: &str = "labels";

/// Image id whose image object is stored as PNG; every other id is JPEG.
const PNG_IMAGE_ID: &str = "test";

pub type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Object names for one image/label pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKeys {
    pub image_id: String,
    pub image: String,
    pub labels: String,
}

impl AssetKeys {
    pub fn for_image_id(image_id: &str) -> Result<Self, AssetFetchError> {
        validate_image_id(image_id)?;
        let extension = if image_id == PNG_IMAGE_ID { "png" } else { "jpg" };
        Ok(Self {
            image_id: image_id.to_owned(),
            image: format!("{image_id}.{extension}"),
            labels: format!("{image_id}.bin"),
        })
    }
}

fn validate_image_id(image_id: &str) -> Result<(), AssetFetchError> {
    let valid = !image_id.is_empty()
        && !image_id.starts_with('.')
        && image_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AssetFetchError::InvalidId {
            id: image_id.to_owned(),
        })
    }
}

#[derive(Debug)]
pub enum AssetFetchError {
    InvalidId { id: String },
    Image { key: String, source: BoxedError },
    Labels { key: String, source: BoxedError },
    Decode { key: String, source: image::ImageError },
    Codec { image_id: String, source: LabelCodecError },
}

impl Display for AssetFetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId { id } => write!(f, "invalid image id '{id}'"),
            Self::Image { key, source } => write!(f, "failed fetching image '{key}': {source}"),
            Self::Labels { key, source } => {
                write!(f, "failed fetching label data '{key}': {source}")
            }
            Self::Decode { key, source } => write!(f, "failed decoding image '{key}': {source}"),
            Self::Codec { image_id, source } => {
                write!(f, "label data for '{image_id}' does not fit its image: {source}")
            }
        }
    }
}

impl Error for AssetFetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidId { .. } => None,
            Self::Image { source, .. } | Self::Labels { source, .. } => {
                Some(source.as_ref() as &(dyn Error + 'static))
            }
            Self::Decode { source, .. } => Some(source),
            Self::Codec { source, .. } => Some(source),
        }
    }
}

/// Byte-level access to stored objects. Implementations own their
/// transport and are handed to [`load_image_and_labels`] explicitly.
pub trait AssetSource {
    fn fetch_object(&self, key: &str) -> Result<Vec<u8>, BoxedError>;

    fn describe(&self) -> String;
}

/// Fully resolved image/label pair. Only built when both objects were
/// fetched, decoded and checked against each other.
#[derive(Debug, Clone)]
pub struct LoadedAssets {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub image: Vec<u8>,
    pub raw_labels: Vec<u8>,
    pub labels: EncodedLabels,
}

pub fn load_image_and_labels(
    source: &dyn AssetSource,
    image_id: &str,
) -> Result<LoadedAssets, AssetFetchError> {
    let keys = AssetKeys::for_image_id(image_id)?;
    log::debug!("loading '{}' from {}", keys.image_id, source.describe());

    let image_bytes = source
        .fetch_object(&keys.image)
        .map_err(|source| AssetFetchError::Image {
            key: keys.image.clone(),
            source,
        })?;
    let raw_labels = source
        .fetch_object(&keys.labels)
        .map_err(|source| AssetFetchError::Labels {
            key: keys.labels.clone(),
            source,
        })?;

    let decoded = image::load_from_memory(&image_bytes)
        .map_err(|source| AssetFetchError::Decode {
            key: keys.image.clone(),
            source,
        })?
        .to_rgba8();
    let (width, height) = decoded.dimensions();

    let labels =
        encode_labels(&raw_labels, width, height).map_err(|source| AssetFetchError::Codec {
            image_id: keys.image_id.clone(),
            source,
        })?;

    log::debug!(
        "loaded '{}': {}x{} image, {} label bytes",
        keys.image_id,
        width,
        height,
        raw_labels.len()
    );

    Ok(LoadedAssets {
        image_id: keys.image_id,
        width,
        height,
        image: decoded.into_raw(),
        raw_labels,
        labels,
    })
}

/// Objects stored as plain files in one directory.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for LocalAssetStore {
    fn fetch_object(&self, key: &str) -> Result<Vec<u8>, BoxedError> {
        let path = self.root.join(key);
        fs::read(&path).map_err(|error| format!("{}: {error}", path.display()).into())
    }

    fn describe(&self) -> String {
        format!("local store {}", self.root.display())
    }
}

/// Public URL of an object in a storage bucket:
/// `<base>/storage/v1/object/public/<bucket>/<key>`.
pub fn public_object_url(base: &Url, bucket: &str, key: &str) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["storage", "v1", "object", "public", bucket, key]);
    Some(url)
}

#[cfg(feature = "remote")]
pub use remote::HttpAssetStore;

#[cfg(feature = "remote")]
mod remote {
    use reqwest::blocking::Client;
    use url::Url;

    use super::{public_object_url, AssetSource, BoxedError};

    /// Objects served from a public storage bucket over HTTP.
    #[derive(Debug, Clone)]
    pub struct HttpAssetStore {
        http: Client,
        base_url: Url,
        bucket: String,
    }

    impl HttpAssetStore {
        pub fn new(http: Client, base_url: Url, bucket: impl Into<String>) -> Self {
            Self {
                http,
                base_url,
                bucket: bucket.into(),
            }
        }
    }

    impl AssetSource for HttpAssetStore {
        fn fetch_object(&self, key: &str) -> Result<Vec<u8>, BoxedError> {
            let url = public_object_url(&self.base_url, &self.bucket, key)
                .ok_or_else(|| format!("'{}' cannot be used as a base url", self.base_url))?;
            let bytes = self.http.get(url).send()?.error_for_status()?.bytes()?;
            Ok(bytes.to_vec())
        }

        fn describe(&self) -> String {
            format!("bucket '{}' at {}", self.bucket, self.base_url)
        }
    }
}
