//! Name to factory lookup for matchers and mailets.
//!
//! Processors refer to matchers and mailets by string identifier. Every
//! identifier is resolved, and every condition and mailet setting parsed,
//! when the pipeline is built. Nothing configured can fail to resolve later.

use std::{fmt, sync::Arc};

use ahash::{AHashMap, AHashSet};
use mailet_common::internal;

use crate::{
    ConfigError, MailetContext, Pipeline, Processor,
    config::ProcessorConfig,
    mailet::{
        Fail, Identity, LocalDelivery, Mailet, MailetConfig, Null, PostmasterAlias, SetAttribute,
        ToProcessor,
    },
    matcher::{
        All, HasAttribute, HostIs, HostIsLocal, Matcher, RecipientIs, RecipientIsLocal, SenderIs,
        UserIs,
    },
    processor::Pair,
};

pub type MatcherFactory =
    Arc<dyn Fn(&str, &MailetContext) -> Result<Box<dyn Matcher>, ConfigError> + Send + Sync>;

pub type MailetFactory = Arc<
    dyn Fn(&MailetConfig, &MailetContext) -> Result<Box<dyn Mailet>, ConfigError> + Send + Sync,
>;

#[derive(Clone)]
pub struct Registry {
    matchers: AHashMap<String, MatcherFactory>,
    mailets: AHashMap<String, MailetFactory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut matchers: Vec<_> = self.matchers.keys().collect();
        let mut mailets: Vec<_> = self.mailets.keys().collect();
        matchers.sort_unstable();
        mailets.sort_unstable();

        f.debug_struct("Registry")
            .field("matchers", &matchers)
            .field("mailets", &mailets)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl Registry {
    /// A registry with nothing registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            matchers: AHashMap::new(),
            mailets: AHashMap::new(),
        }
    }

    /// A registry with every built-in matcher and mailet
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry
            .register_matcher("All", |_, _| Ok(Box::new(All)))
            .register_matcher("RecipientIs", |condition, _| {
                Ok(Box::new(RecipientIs::new(condition)?))
            })
            .register_matcher("UserIs", |condition, _| Ok(Box::new(UserIs::new(condition)?)))
            .register_matcher("HostIs", |condition, _| Ok(Box::new(HostIs::new(condition)?)))
            .register_matcher("HostIsLocal", |_, context| {
                Ok(Box::new(HostIsLocal::new(Arc::clone(&context.users))))
            })
            .register_matcher("RecipientIsLocal", |_, context| {
                Ok(Box::new(RecipientIsLocal::new(Arc::clone(&context.users))))
            })
            .register_matcher("SenderIs", |condition, _| {
                Ok(Box::new(SenderIs::new(condition)?))
            })
            .register_matcher("HasAttribute", |condition, _| {
                Ok(Box::new(HasAttribute::new(condition)?))
            });

        registry
            .register_mailet("Identity", |_, _| Ok(Box::new(Identity)))
            .register_mailet("Null", |_, _| Ok(Box::new(Null)))
            .register_mailet("PostmasterAlias", |_, context| {
                Ok(Box::new(PostmasterAlias::new(
                    context.postmaster.clone(),
                    Arc::clone(&context.users),
                )))
            })
            .register_mailet("LocalDelivery", |_, context| {
                Ok(Box::new(LocalDelivery::new(
                    Arc::clone(&context.users),
                    Arc::clone(&context.inboxes),
                    Arc::clone(&context.spool),
                )))
            })
            .register_mailet("ToProcessor", |config, _| Ok(Box::new(ToProcessor::new(config)?)))
            .register_mailet("SetAttribute", |config, _| {
                Ok(Box::new(SetAttribute::new(config)?))
            })
            .register_mailet("Fail", |config, _| Ok(Box::new(Fail::new(config)?)));

        registry
    }

    /// Register (or replace) a matcher factory
    pub fn register_matcher<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &MailetContext) -> Result<Box<dyn Matcher>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.matchers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register (or replace) a mailet factory
    pub fn register_mailet<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&MailetConfig, &MailetContext) -> Result<Box<dyn Mailet>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.mailets.insert(name.into(), Arc::new(factory));
        self
    }

    /// Construct the matcher registered as `name`
    ///
    /// # Errors
    /// If `name` is unknown or the factory rejects `condition`
    pub fn matcher(
        &self,
        name: &str,
        condition: &str,
        context: &MailetContext,
    ) -> Result<Box<dyn Matcher>, ConfigError> {
        let factory = self
            .matchers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownMatcher(name.to_string()))?;
        factory(condition, context)
    }

    /// Construct the mailet registered as `name`
    ///
    /// # Errors
    /// If `name` is unknown or the factory rejects `config`
    pub fn mailet(
        &self,
        name: &str,
        config: &MailetConfig,
        context: &MailetContext,
    ) -> Result<Box<dyn Mailet>, ConfigError> {
        let factory = self
            .mailets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownMailet(name.to_string()))?;
        factory(config, context)
    }

    /// Build every configured processor
    ///
    /// # Errors
    /// - Two processors share a name
    /// - `root` is not one of them
    /// - A fallback or a routing mailet names an undefined processor, or a
    ///   processor falls back to itself
    /// - Any matcher or mailet cannot be constructed
    pub fn build(
        &self,
        root: &str,
        processors: &[ProcessorConfig],
        context: &MailetContext,
    ) -> Result<Pipeline, ConfigError> {
        let mut names = AHashSet::new();
        for processor in processors {
            if !names.insert(processor.name.as_str()) {
                return Err(ConfigError::DuplicateProcessor(processor.name.clone()));
            }
        }

        if !names.contains(root) {
            return Err(ConfigError::MissingRoot(root.to_string()));
        }

        let check_target = |referenced_by: &str, target: &str| {
            if names.contains(target) {
                Ok(())
            } else {
                Err(ConfigError::UndefinedProcessor {
                    referenced_by: referenced_by.to_string(),
                    target: target.to_string(),
                })
            }
        };

        let mut built = AHashMap::with_capacity(processors.len());

        for processor in processors {
            if let Some(fallback) = &processor.fallback {
                if *fallback == processor.name {
                    return Err(ConfigError::SelfFallback(processor.name.clone()));
                }
                check_target(&processor.name, fallback)?;
            }

            let mut pairs = Vec::with_capacity(processor.mailets.len());
            for pair in &processor.mailets {
                let matcher = self.matcher(&pair.matcher, &pair.condition, context)?;
                let mailet = self.mailet(&pair.mailet, &pair.config, context)?;

                if let Some(target) = mailet.routes_to() {
                    check_target(&processor.name, target)?;
                }

                pairs.push(Pair {
                    matcher_name: pair.matcher.clone(),
                    matcher,
                    mailet_name: pair.mailet.clone(),
                    mailet,
                });
            }

            internal!(
                level = DEBUG,
                "Built processor {} with {} pair(s)",
                processor.name,
                pairs.len()
            );

            built.insert(
                processor.name.clone(),
                Processor::new(processor.name.clone(), pairs, processor.fallback.clone()),
            );
        }

        Ok(Pipeline::new(root.to_string(), built))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailet_spool::{MemoryRepository, RepositoryConfig};
    use mailet_users::MemoryUsersRepository;

    use super::*;
    use crate::{InboxStore, config::PairConfig};

    fn context() -> MailetContext {
        MailetContext {
            postmaster: "admin@local.test".parse().unwrap(),
            users: Arc::new(MemoryUsersRepository::new(["local.test"])),
            inboxes: Arc::new(InboxStore::new(RepositoryConfig::default())),
            spool: Arc::new(MemoryRepository::new()),
        }
    }

    fn pair(matcher: &str, condition: &str, mailet: &str, config: &[(&str, &str)]) -> PairConfig {
        PairConfig {
            matcher: matcher.to_string(),
            condition: condition.to_string(),
            mailet: mailet.to_string(),
            config: config
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn processor(name: &str, fallback: Option<&str>, mailets: Vec<PairConfig>) -> ProcessorConfig {
        ProcessorConfig {
            name: name.to_string(),
            fallback: fallback.map(str::to_string),
            mailets,
        }
    }

    #[test]
    fn test_build_standard_pipeline() {
        let pipeline = Registry::standard()
            .build(
                "root",
                &[
                    processor(
                        "root",
                        Some("error"),
                        vec![
                            pair("UserIs", "postmaster", "PostmasterAlias", &[]),
                            pair("RecipientIsLocal", "", "LocalDelivery", &[]),
                            pair("HostIs", "remote.test", "ToProcessor", &[("processor", "error")]),
                        ],
                    ),
                    processor("error", None, vec![pair("All", "", "Null", &[])]),
                ],
                &context(),
            )
            .unwrap();

        assert_eq!(pipeline.root(), "root");
        assert_eq!(pipeline.names(), vec!["error", "root"]);
        assert_eq!(pipeline.get("root").unwrap().pairs().len(), 3);
    }

    #[test]
    fn test_unknown_identifiers_fail() {
        let registry = Registry::standard();

        let result = registry.build(
            "root",
            &[processor("root", None, vec![pair("Nope", "", "Identity", &[])])],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::UnknownMatcher(name)) if name == "Nope"));

        let result = registry.build(
            "root",
            &[processor("root", None, vec![pair("All", "", "Nope", &[])])],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::UnknownMailet(name)) if name == "Nope"));
    }

    #[test]
    fn test_malformed_condition_fails() {
        let result = Registry::standard().build(
            "root",
            &[processor("root", None, vec![pair("RecipientIs", "nobody", "Identity", &[])])],
            &context(),
        );

        assert!(matches!(result, Err(ConfigError::InvalidCondition { .. })));
    }

    #[test]
    fn test_undefined_targets_fail() {
        let registry = Registry::standard();

        let result = registry.build(
            "root",
            &[processor("root", Some("error"), vec![])],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::UndefinedProcessor { .. })));

        let result = registry.build(
            "root",
            &[processor(
                "root",
                None,
                vec![pair("All", "", "ToProcessor", &[("processor", "transport")])],
            )],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::UndefinedProcessor { .. })));

        let result = registry.build("root", &[processor("root", Some("root"), vec![])], &context());
        assert!(matches!(result, Err(ConfigError::SelfFallback(_))));
    }

    #[test]
    fn test_structural_errors() {
        let registry = Registry::standard();

        let result = registry.build("root", &[processor("other", None, vec![])], &context());
        assert!(matches!(result, Err(ConfigError::MissingRoot(_))));

        let result = registry.build(
            "root",
            &[processor("root", None, vec![]), processor("root", None, vec![])],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::DuplicateProcessor(_))));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = Registry::empty();
        registry
            .register_matcher("Everyone", |_, _| Ok(Box::new(All)))
            .register_mailet("Noop", |_, _| Ok(Box::new(Identity)));

        let result = registry.build(
            "root",
            &[processor("root", None, vec![pair("Everyone", "", "Noop", &[])])],
            &context(),
        );
        assert!(result.is_ok());

        let result = registry.build(
            "root",
            &[processor("root", None, vec![pair("All", "", "Noop", &[])])],
            &context(),
        );
        assert!(matches!(result, Err(ConfigError::UnknownMatcher(_))));
    }
}
