//! Version-ordered strategy tables
//!
//! Each loader family owns a fixed table of (version predicate, constructor)
//! pairs evaluated top to bottom; the first matching predicate wins. Table
//! order is part of the contract: NeoForge's fork-era builds (47.x) sort
//! numerically above its modern scheme (20.x+), so the fork entry must come
//! first.

use std::collections::HashSet;
use std::str::FromStr;

use lazy_static::lazy_static;
use semver::{Version, VersionReq};
use tracing::info;

use crate::infrastructure::error::{invalid_input, Error, ErrorKind};
use crate::resolver::extract::{ExtractProfile, ExtractStrategy};
use crate::resolver::installer::{InstallerProfile, InstallerStrategy};
use crate::resolver::{ResolverContext, VersionStrategy};

/// The two supported mod-loader product lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderFamily {
    Forge,
    NeoForge,
}

impl LoaderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderFamily::Forge => "forge",
            LoaderFamily::NeoForge => "neoforge",
        }
    }
}

impl FromStr for LoaderFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &*s.to_lowercase() {
            "forge" => Ok(LoaderFamily::Forge),
            "neoforge" => Ok(LoaderFamily::NeoForge),
            other => Err(invalid_input(format!(
                "Unknown loader family '{}'",
                other
            ))),
        }
    }
}

type StrategyCtor = fn(ResolverContext) -> Box<dyn VersionStrategy>;

lazy_static! {
    /// Forge builds 25+ (game 1.13+) ship a standalone installer; the
    /// 7.8-24 era embeds everything in the universal jar
    static ref FORGE_STRATEGIES: Vec<(VersionReq, StrategyCtor)> = vec![
        (VersionReq::parse(">=25.0.0").unwrap(), |ctx| {
            Box::new(InstallerStrategy::new(ctx, InstallerProfile::forge()))
        }),
        (VersionReq::parse(">=7.8.0, <25.0.0").unwrap(), |ctx| {
            Box::new(ExtractStrategy::new(ctx, ExtractProfile::forge_legacy()))
        }),
    ];

    static ref NEOFORGE_STRATEGIES: Vec<(VersionReq, StrategyCtor)> = vec![
        // fork-era builds keep Forge's 47.x numbering and layout
        (VersionReq::parse(">=47.0.0").unwrap(), |ctx| {
            Box::new(InstallerStrategy::new(
                ctx,
                InstallerProfile::neoforge_fork(),
            ))
        }),
        (VersionReq::parse(">=20.2.0, <47.0.0").unwrap(), |ctx| {
            Box::new(InstallerStrategy::new(ctx, InstallerProfile::neoforge()))
        }),
    ];

    /// These loader versions are not worth supporting!
    static ref FORGE_SKIP_LIST: HashSet<&'static str> = [
        // Malformed archives
        "1.6.1-8.9.0.749",
        "1.6.1-8.9.0.751",
        "1.6.4-9.11.1.960",
        "1.6.4-9.11.1.961",
        "1.6.4-9.11.1.963",
        "1.6.4-9.11.1.964",
    ]
    .into_iter()
    .collect();

    static ref NEOFORGE_SKIP_LIST: HashSet<&'static str> = [
        // Add known broken versions here as they're discovered
    ]
    .into_iter()
    .collect();
}

/// Parses a loader build string into a comparable semver version. Legacy
/// four-segment builds (`14.23.5.2859`) carry their final segment as build
/// metadata, which the range predicates ignore.
pub fn normalize_loader_build(loader_version: &str) -> Result<Version, Error> {
    let segments: Vec<&str> = loader_version.split('.').collect();

    let candidate = if segments.len() >= 4 {
        format!(
            "{}.{}.{}+{}",
            segments[0], segments[1], segments[2], segments[3]
        )
    } else {
        loader_version.to_string()
    };

    Version::parse(&candidate).map_err(|err| ErrorKind::VersionParse {
        version: loader_version.to_string(),
        reason: err.to_string(),
    })
}

/// Selects the strategy for the context's (game, loader) version pair.
/// Evaluation is ordered and deterministic; an uncovered pair fails with
/// `NoStrategyFound`.
pub fn select(
    family: LoaderFamily,
    ctx: ResolverContext,
) -> Result<Box<dyn VersionStrategy>, Error> {
    let (table, skip_list): (&Vec<(VersionReq, StrategyCtor)>, _) =
        match family {
            LoaderFamily::Forge => (&FORGE_STRATEGIES, &*FORGE_SKIP_LIST),
            LoaderFamily::NeoForge => {
                (&NEOFORGE_STRATEGIES, &*NEOFORGE_SKIP_LIST)
            }
        };

    let full_version =
        format!("{}-{}", ctx.game_version, ctx.loader_version);
    if skip_list.contains(&*full_version) {
        return Err(invalid_input(format!(
            "{} {} is a known broken release",
            family.as_str(),
            full_version
        )));
    }

    let build = normalize_loader_build(&ctx.loader_version)?;

    for (requirement, constructor) in table.iter() {
        if requirement.matches(&build) {
            info!(
                "Selected strategy for {} {} (predicate {})",
                family.as_str(),
                full_version,
                requirement
            );
            return Ok(constructor(ctx));
        }
    }

    Err(ErrorKind::NoStrategyFound {
        family: family.as_str().to_string(),
        game_version: ctx.game_version.to_string(),
        loader_version: ctx.loader_version.clone(),
    })
}
