use {
    derive_more::{Debug, Display},
    getset::Getters,
    smallvec::SmallVec,
    strum::EnumCount,
    strum_macros::{
        AsRefStr, EnumCount, EnumIter, EnumString, IntoStaticStr, VariantArray, VariantNames,
    },
};

/// The built-in third-party providers reporting the caller's public address.
#[derive(
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Display,
    EnumIter,
    EnumCount,
    VariantArray,
    VariantNames,
    EnumString,
    IntoStaticStr,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum HttpProvider {
    #[display("ipapi")]
    IpApi,
    #[display("ipwhois")]
    IpWhoIs,
    #[display("ifconfig")]
    IfConfig,
    #[display("ipsb")]
    IpSb,
}

pub type HttpProviders = SmallVec<[HttpProvider; HttpProvider::COUNT]>;

impl HttpProvider {
    pub const fn request_uri(&self) -> &'static str {
        match self {
            Self::IpApi => "https://ipapi.co/json",
            Self::IpWhoIs => "https://ipwho.is/",
            Self::IfConfig => "https://ifconfig.co/json",
            Self::IpSb => "https://api.ip.sb/geoip",
        }
    }

    // The JSON key under which the provider reports the country code.
    pub const fn country_field(&self) -> &'static str {
        match self {
            Self::IfConfig => "country_iso",
            Self::IpApi | Self::IpWhoIs | Self::IpSb => "country_code",
        }
    }

    pub fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new(self.as_ref(), self.request_uri(), self.country_field())
    }
}

impl From<HttpProvider> for ProviderDescriptor {
    fn from(provider: HttpProvider) -> Self {
        provider.descriptor()
    }
}

/// Immutable description of one provider: how it is called,
/// and where it keeps the country code in its response.
#[derive(Clone, PartialEq, Eq, Debug, Display, Getters)]
#[display("{}", name)]
#[debug("{} ({})", name, url)]
pub struct ProviderDescriptor {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    url: String,

    #[getset(get = "pub")]
    country_field: String,
}

impl ProviderDescriptor {
    pub fn new<N, U, F>(name: N, url: U, country_field: F) -> Self
    where
        N: Into<String>,
        U: Into<String>,
        F: Into<String>,
    {
        Self {
            name: name.into(),
            url: url.into(),
            country_field: country_field.into(),
        }
    }
}
