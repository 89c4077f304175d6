use {
    crate::providers::{HttpProvider, ProviderDescriptor},
    anyhow::{Result, bail},
    rand::seq::SliceRandom,
    smallvec::SmallVec,
    strum::{EnumCount, VariantArray},
};

pub type Descriptors = SmallVec<[ProviderDescriptor; HttpProvider::COUNT]>;

/// Static set of providers, handed out in a fresh random order every time.
#[derive(Clone, Debug)]
pub struct Registry {
    providers: Descriptors,
}

impl Registry {
    pub fn new<P>(providers: P) -> Result<Self>
    where
        P: IntoIterator,
        P::Item: Into<ProviderDescriptor>,
    {
        let providers: Descriptors = providers.into_iter().map(Into::into).collect();

        if providers.is_empty() {
            bail!("non-empty list of providers is required")
        }

        Ok(Self { providers })
    }

    /// Registry with every built-in [HttpProvider].
    pub fn builtin() -> Self {
        Self {
            providers: HttpProvider::VARIANTS
                .iter()
                .map(HttpProvider::descriptor)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    /// Returns all providers in a uniformly random permutation.
    pub fn ordered_attempts(&self) -> Descriptors {
        let mut attempts = self.providers.clone();
        attempts.shuffle(&mut rand::thread_rng());
        attempts
    }
}
