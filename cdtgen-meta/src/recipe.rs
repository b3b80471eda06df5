//! Recipe emission
//!
//! Renders a mapped package into the two files of a CDT recipe, `meta.yaml`
//! and `build.sh`. Rendering is a pure function of its inputs: the same
//! record, requirements, rule and prior emission always give byte-identical
//! texts.

use std::fmt::Write as _;

use serde::Deserialize;

use crate::config::{BuildNumberConfig, MappingRule};
use crate::depexpr::Requirement;
use crate::hash::compute_fingerprint;
use crate::primary::PackageRecord;
use crate::{Error, Result};

pub const META_YAML: &str = "meta.yaml";
pub const BUILD_SH: &str = "build.sh";

/// Layout of the emitted `meta.yaml`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipeStyle {
    /// Literal values everywhere
    #[default]
    Plain,
    /// `{% set %}` header variables referenced from the body
    CondaForge,
}

/// What the previous run emitted for a tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorEmission {
    pub source_url: String,
    pub version: String,
    pub bump: u32,
}

impl PriorEmission {
    /// Recover a prior emission from an existing `meta.yaml`.
    ///
    /// `offset` is the build-number offset in effect for the package; it is
    /// subtracted from the rendered increment to get the bump.
    pub fn from_recipe_text(meta_yaml: &str, placeholder: &str, offset: u32) -> Option<Self> {
        let mut source_url = None;
        let mut version = None;
        let mut number = None;
        let mut set_version = None;

        for line in meta_yaml.lines() {
            let trimmed = line.trim().trim_start_matches("- ");
            if let Some(rest) = trimmed.strip_prefix("{% set version =") {
                set_version = Some(unquote(rest.trim_end_matches("%}").trim()));
            } else if let Some(rest) = trimmed.strip_prefix("url:") {
                source_url.get_or_insert_with(|| unquote(rest.trim()));
            } else if let Some(rest) = trimmed.strip_prefix("version:") {
                version.get_or_insert_with(|| unquote(rest.trim()));
            } else if let Some(rest) = trimmed.strip_prefix("number:") {
                number.get_or_insert_with(|| rest.trim().to_string());
            }
        }

        let version = match version {
            Some(v) if v.contains("{{") => set_version?,
            Some(v) => v,
            None => return None,
        };
        let increment = parse_build_number(&number?, placeholder)?;

        Some(Self {
            source_url: source_url?,
            version,
            bump: increment.saturating_sub(offset),
        })
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').trim_matches('\'').to_string()
}

/// Parse `{{ placeholder }}` or `{{ placeholder|int + N }}` into N.
fn parse_build_number(value: &str, placeholder: &str) -> Option<u32> {
    let inner = value
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    if inner == placeholder {
        return Some(0);
    }
    let rest = inner.strip_prefix(placeholder)?.trim_start();
    let rest = rest.strip_prefix("|")?.trim_start();
    let rest = rest.strip_prefix("int")?.trim_start();
    rest.strip_prefix('+')?.trim().parse().ok()
}

/// Render the build-number expression for a total increment.
pub fn build_number_expr(placeholder: &str, increment: u32) -> String {
    if increment == 0 {
        format!("{{{{ {} }}}}", placeholder)
    } else {
        format!("{{{{ {}|int + {} }}}}", placeholder, increment)
    }
}

/// Decide the bump of this emission from the prior one.
///
/// An upstream change (source URL or version) is only accepted when
/// `keep_url_changes` is set, and then increments the bump.
pub fn next_bump(
    package: &str,
    prior: Option<&PriorEmission>,
    source_url: &str,
    version: &str,
    keep_url_changes: bool,
) -> Result<u32> {
    let Some(prior) = prior else {
        return Ok(0);
    };
    if prior.source_url == source_url && prior.version == version {
        return Ok(prior.bump);
    }
    if !keep_url_changes {
        return Err(Error::BuildNumberPolicy {
            package: package.to_string(),
            old_url: prior.source_url.clone(),
            new_url: source_url.to_string(),
            old_version: prior.version.clone(),
            new_version: version.to_string(),
        });
    }
    Ok(prior.bump + 1)
}

/// CDT package name of an RPM package, `{name}-{distro}-{architecture}`
pub fn cdt_name(package: &str, distro: &str, architecture: &str) -> String {
    format!("{}-{}-{}", package.to_lowercase(), distro, architecture)
}

/// Target triple directory the sysroot lives under
fn sysroot_triple(architecture: &str) -> String {
    match architecture {
        "ppc64le" => "powerpc64le-conda-linux-gnu".to_string(),
        arch => format!("{}-conda-linux-gnu", arch),
    }
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Inputs of one emission besides the record and its mapped requirements
#[derive(Debug, Clone)]
pub struct EmitContext<'a> {
    pub distro: &'a str,
    pub architecture: &'a str,
    pub rule: &'a MappingRule,
    pub build_number: &'a BuildNumberConfig,
    pub style: RecipeStyle,
    pub prior: Option<&'a PriorEmission>,
    pub keep_url_changes: bool,
}

impl EmitContext<'_> {
    /// Offset applied to the build number of this package
    pub fn offset(&self) -> u32 {
        if self.rule.uses_replacements() {
            self.build_number.offset
        } else {
            0
        }
    }
}

/// A fully rendered recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSpec {
    pub package: String,
    pub distro: String,
    pub architecture: String,
    pub version: String,
    pub source_url: String,
    pub bump: u32,
    pub meta_yaml: String,
    pub build_sh: String,
}

impl RecipeSpec {
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(&self.meta_yaml, &self.build_sh)
    }
}

/// Render the recipe of `record` with its mapped `requirements`.
pub fn emit(record: &PackageRecord, requirements: &[Requirement], ctx: &EmitContext) -> Result<RecipeSpec> {
    let version = record.version().to_string();
    let bump = next_bump(
        &record.name,
        ctx.prior,
        &record.source_url,
        &version,
        ctx.keep_url_changes,
    )?;
    let build_number = build_number_expr(&ctx.build_number.placeholder, ctx.offset() + bump);

    Ok(RecipeSpec {
        package: record.name.clone(),
        distro: ctx.distro.to_string(),
        architecture: ctx.architecture.to_string(),
        meta_yaml: render_meta_yaml(record, requirements, ctx, &build_number)?,
        build_sh: render_build_sh(ctx)?,
        version,
        source_url: record.source_url.clone(),
        bump,
    })
}

/// Substitution targets name packages of the target ecosystem and are kept
/// as written.
fn render_requirement(requirement: &Requirement, ctx: &EmitContext) -> String {
    let name = if requirement.substituted {
        requirement.name.clone()
    } else {
        cdt_name(&requirement.name, ctx.distro, ctx.architecture)
    };
    match &requirement.constraint {
        Some(c) => format!("{} {}{}", name, c.op.symbol(), c.evr.version),
        None => name,
    }
}

fn render_meta_yaml(
    record: &PackageRecord,
    requirements: &[Requirement],
    ctx: &EmitContext,
    build_number: &str,
) -> Result<String> {
    let mut out = String::new();
    let conda_forge = ctx.style == RecipeStyle::CondaForge;

    if conda_forge {
        writeln!(out, "{{% set name = {} %}}", yaml_quote(&record.name))?;
        writeln!(out, "{{% set version = {} %}}", yaml_quote(record.version()))?;
        writeln!(
            out,
            "{{% set release = {} %}}",
            yaml_quote(record.evr.release.as_deref().unwrap_or(""))
        )?;
        writeln!(out, "{{% set distro = {} %}}", yaml_quote(ctx.distro))?;
        writeln!(out, "{{% set cdt_arch = {} %}}", yaml_quote(ctx.architecture))?;
        writeln!(out)?;
        writeln!(out, "package:")?;
        writeln!(out, "  name: {{{{ name|lower }}}}-{{{{ distro }}}}-{{{{ cdt_arch }}}}")?;
        writeln!(out, "  version: {{{{ version }}}}")?;
    } else {
        writeln!(out, "package:")?;
        writeln!(
            out,
            "  name: {}",
            cdt_name(&record.name, ctx.distro, ctx.architecture)
        )?;
        writeln!(out, "  version: {}", yaml_quote(record.version()))?;
    }

    writeln!(out)?;
    writeln!(out, "source:")?;
    writeln!(out, "  url: {}", record.source_url)?;
    if let Some(checksum) = record.checksum.as_ref().filter(|c| c.algorithm == "sha256") {
        writeln!(out, "  sha256: {}", checksum.value)?;
    }
    writeln!(out, "  folder: binary")?;

    writeln!(out)?;
    writeln!(out, "build:")?;
    writeln!(out, "  number: {}", build_number)?;
    writeln!(out, "  noarch: generic")?;
    writeln!(out, "  missing_dso_whitelist:")?;
    writeln!(out, "    - '*'")?;

    writeln!(out)?;
    writeln!(out, "requirements:")?;
    if requirements.is_empty() {
        writeln!(out, "  run: []")?;
    } else {
        writeln!(out, "  run:")?;
        for requirement in requirements {
            writeln!(out, "    - {}", render_requirement(requirement, ctx))?;
        }
    }

    writeln!(out)?;
    writeln!(out, "about:")?;
    if let Some(home) = &record.homepage {
        writeln!(out, "  home: {}", home)?;
    }
    writeln!(out, "  license: {}", yaml_quote(&record.license))?;
    match ctx.rule.license_files.as_slice() {
        [] => {}
        [single] => {
            writeln!(out, "  license_file: {}", single)?;
        }
        many => {
            writeln!(out, "  license_file:")?;
            for file in many {
                writeln!(out, "    - {}", file)?;
            }
        }
    }
    writeln!(out, "  summary: {}", yaml_quote(&format!("(CDT) {}", record.summary.trim())))?;
    let description: Vec<&str> = record.description.trim().lines().map(str::trim_end).collect();
    if !description.is_empty() {
        writeln!(out, "  description: |")?;
        for line in description {
            if line.is_empty() {
                writeln!(out)?;
            } else {
                writeln!(out, "    {}", line)?;
            }
        }
    }

    Ok(out)
}

fn render_build_sh(ctx: &EmitContext) -> Result<String> {
    let sysroot = format!("\"${{PREFIX}}\"/{}/sysroot", sysroot_triple(ctx.architecture));
    let mut out = String::new();

    writeln!(out, "#!/bin/bash")?;
    writeln!(out)?;
    writeln!(out, "set -o errexit -o pipefail")?;
    writeln!(out)?;
    writeln!(out, "mkdir -p {}", sysroot)?;
    for lib in ["lib", "lib64"] {
        writeln!(out, "if [[ -d binary/usr/{lib} ]] && [[ ! -e binary/{lib} ]]; then")?;
        writeln!(out, "  ln -s usr/{lib} binary/{lib}")?;
        writeln!(out, "fi")?;
    }
    writeln!(out, "pushd {} > /dev/null 2>&1", sysroot)?;
    writeln!(out, "cp -Rf \"${{SRC_DIR}}\"/binary/* .")?;
    writeln!(out, "popd > /dev/null 2>&1")?;

    if let Some(fragment) = ctx.rule.build_append.as_deref().map(str::trim_end) {
        if !fragment.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", fragment)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::depexpr::Comparison;
    use crate::evr::Evr;
    use crate::primary::parse_primary;
    use crate::primary::tests::PRIMARY;

    fn libx11() -> PackageRecord {
        let mut records = parse_primary(PRIMARY.as_bytes(), "os", "https://mirror/7/os/x86_64/").unwrap();
        let mut record = records.remove(0);
        record.checksum = Some(Checksum::new("sha256", "abcd"));
        record
    }

    fn requirements() -> Vec<Requirement> {
        vec![
            Requirement::versioned("libX11-common", Comparison::Ge, Evr::parse("1.6.7-4.el7_9").unwrap()),
            Requirement::unversioned("libxcb"),
        ]
    }

    fn ctx<'a>(rule: &'a MappingRule, bn: &'a BuildNumberConfig, prior: Option<&'a PriorEmission>) -> EmitContext<'a> {
        EmitContext {
            distro: "centos7",
            architecture: "x86_64",
            rule,
            build_number: bn,
            style: RecipeStyle::Plain,
            prior,
            keep_url_changes: false,
        }
    }

    #[test]
    fn test_emit_plain_meta_yaml() {
        let rule = MappingRule {
            license_files: vec!["COPYING".to_string()],
            ..Default::default()
        };
        let bn = BuildNumberConfig::default();
        let spec = emit(&libx11(), &requirements(), &ctx(&rule, &bn, None)).unwrap();

        assert!(spec.meta_yaml.contains("  name: libx11-centos7-x86_64\n"));
        assert!(spec.meta_yaml.contains("  version: \"1.6.7\"\n"));
        assert!(spec.meta_yaml.contains(
            "  url: https://mirror/7/os/x86_64/Packages/libX11-1.6.7-4.el7_9.x86_64.rpm\n"
        ));
        assert!(spec.meta_yaml.contains("  sha256: abcd\n"));
        assert!(spec.meta_yaml.contains("  number: {{ cdt_build_number }}\n"));
        assert!(spec.meta_yaml.contains("    - libx11-common-centos7-x86_64 >=1.6.7\n"));
        assert!(spec.meta_yaml.contains("    - libxcb-centos7-x86_64\n"));
        assert!(spec.meta_yaml.contains("  license_file: COPYING\n"));
        assert!(spec.meta_yaml.contains("  summary: \"(CDT) Core X11 protocol client library\"\n"));
        assert_eq!(spec.bump, 0);
        assert!(spec.build_sh.starts_with("#!/bin/bash\n"));
        assert!(spec.build_sh.contains("x86_64-conda-linux-gnu/sysroot"));
    }

    #[test]
    fn test_emit_is_deterministic() {
        let rule = MappingRule::default();
        let bn = BuildNumberConfig::default();
        let a = emit(&libx11(), &requirements(), &ctx(&rule, &bn, None)).unwrap();
        let b = emit(&libx11(), &requirements(), &ctx(&rule, &bn, None)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_offset_only_with_replacements() {
        let rule = MappingRule {
            replace: [("libxcb".to_string(), "xorg-libxcb".to_string())].into(),
            ..Default::default()
        };
        let bn = BuildNumberConfig::default();
        let reqs = vec![Requirement::unversioned("libxcb").substitute("xorg-libxcb")];
        let spec = emit(&libx11(), &reqs, &ctx(&rule, &bn, None)).unwrap();
        assert!(spec.meta_yaml.contains("  number: {{ cdt_build_number|int + 1000 }}\n"));
        // replacement targets are written as given
        assert!(spec.meta_yaml.contains("    - xorg-libxcb\n"));
    }

    #[test]
    fn test_distro_package_named_like_a_target_gets_suffix() {
        let rule = MappingRule {
            replace: [("libxcb-old".to_string(), "libxcb".to_string())].into(),
            ..Default::default()
        };
        let bn = BuildNumberConfig::default();
        let reqs = vec![
            Requirement::unversioned("libxcb"),
            Requirement::unversioned("libxcb-old").substitute("libxcb"),
        ];
        let spec = emit(&libx11(), &reqs, &ctx(&rule, &bn, None)).unwrap();
        assert!(spec.meta_yaml.contains("    - libxcb-centos7-x86_64\n"));
        assert!(spec.meta_yaml.contains("    - libxcb\n"));
    }

    #[test]
    fn test_unchanged_upstream_preserves_bump() {
        let rule = MappingRule::default();
        let bn = BuildNumberConfig::default();
        let record = libx11();
        let prior = PriorEmission {
            source_url: record.source_url.clone(),
            version: "1.6.7".to_string(),
            bump: 2,
        };
        let spec = emit(&record, &requirements(), &ctx(&rule, &bn, Some(&prior))).unwrap();
        assert_eq!(spec.bump, 2);
        assert!(spec.meta_yaml.contains("  number: {{ cdt_build_number|int + 2 }}\n"));
    }

    #[test]
    fn test_changed_url_requires_authorization() {
        let rule = MappingRule::default();
        let bn = BuildNumberConfig::default();
        let record = libx11();
        let prior = PriorEmission {
            source_url: "https://mirror/7/os/x86_64/Packages/libX11-1.6.5-2.el7.x86_64.rpm".to_string(),
            version: "1.6.5".to_string(),
            bump: 0,
        };

        let err = emit(&record, &requirements(), &ctx(&rule, &bn, Some(&prior))).unwrap_err();
        match &err {
            Error::BuildNumberPolicy {
                old_url,
                new_url,
                old_version,
                new_version,
                ..
            } => {
                assert_eq!(old_url, &prior.source_url);
                assert_eq!(new_url, &record.source_url);
                assert_ne!(old_url, new_url);
                assert_eq!(old_version, "1.6.5");
                assert_eq!(new_version, "1.6.7");
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut authorized = ctx(&rule, &bn, Some(&prior));
        authorized.keep_url_changes = true;
        let spec = emit(&record, &requirements(), &authorized).unwrap();
        assert_eq!(spec.bump, 1);
        assert!(spec.meta_yaml.contains("  number: {{ cdt_build_number|int + 1 }}\n"));
    }

    #[test]
    fn test_build_append_and_multiple_license_files() {
        let rule = MappingRule {
            build_append: Some("ln -s libX11.so.6 \"${PREFIX}/lib64/libX11.so\"\n".to_string()),
            license_files: vec!["COPYING".to_string(), "LICENSE".to_string()],
            ..Default::default()
        };
        let bn = BuildNumberConfig::default();
        let spec = emit(&libx11(), &[], &ctx(&rule, &bn, None)).unwrap();
        assert!(spec
            .build_sh
            .ends_with("\nln -s libX11.so.6 \"${PREFIX}/lib64/libX11.so\"\n"));
        assert!(spec.meta_yaml.contains("  license_file:\n    - COPYING\n    - LICENSE\n"));
        assert!(spec.meta_yaml.contains("  run: []\n"));
    }

    #[test]
    fn test_conda_forge_style() {
        let rule = MappingRule::default();
        let bn = BuildNumberConfig::default();
        let mut context = ctx(&rule, &bn, None);
        context.style = RecipeStyle::CondaForge;
        let spec = emit(&libx11(), &requirements(), &context).unwrap();
        assert!(spec.meta_yaml.starts_with("{% set name = \"libX11\" %}\n"));
        assert!(spec.meta_yaml.contains("{% set version = \"1.6.7\" %}\n"));
        assert!(spec.meta_yaml.contains("  version: {{ version }}\n"));
    }

    #[test]
    fn test_prior_recovered_from_emitted_text() {
        let bn = BuildNumberConfig::default();
        let record = libx11();

        for style in [RecipeStyle::Plain, RecipeStyle::CondaForge] {
            let rule = MappingRule {
                replace: [("a".to_string(), "b".to_string())].into(),
                ..Default::default()
            };
            let prior = PriorEmission {
                source_url: record.source_url.clone(),
                version: "1.6.7".to_string(),
                bump: 3,
            };
            let mut context = ctx(&rule, &bn, Some(&prior));
            context.style = style;
            let spec = emit(&record, &requirements(), &context).unwrap();

            let recovered =
                PriorEmission::from_recipe_text(&spec.meta_yaml, "cdt_build_number", 1000).unwrap();
            assert_eq!(recovered, prior);
        }
    }

    #[test]
    fn test_parse_build_number() {
        assert_eq!(parse_build_number("{{ cdt_build_number }}", "cdt_build_number"), Some(0));
        assert_eq!(
            parse_build_number("{{ cdt_build_number|int + 1001 }}", "cdt_build_number"),
            Some(1001)
        );
        assert_eq!(parse_build_number("{{ other }}", "cdt_build_number"), None);
        assert_eq!(parse_build_number("3", "cdt_build_number"), None);
    }

    #[test]
    fn test_ppc64le_sysroot() {
        let rule = MappingRule::default();
        let bn = BuildNumberConfig::default();
        let mut context = ctx(&rule, &bn, None);
        context.architecture = "ppc64le";
        let spec = emit(&libx11(), &[], &context).unwrap();
        assert!(spec.build_sh.contains("powerpc64le-conda-linux-gnu/sysroot"));
    }
}
