//! Dependency mapping
//!
//! Turns the requirements of a [`PackageRecord`] into the flat, sorted list
//! of package requirements written to a recipe. Per package:
//!
//! 1. removal (wins over substitution for the same name)
//! 2. substitution, keeping operator and version
//! 3. rich expression resolution (`Not` drops out, `And` flattens,
//!    an `Or` must be left with at most one alternative)
//! 4. catalog resolution of capabilities to package names, with the
//!    providing package going through steps 1 and 2
//! 5. deduplication, keeping the tightest constraint

use std::collections::BTreeMap;

use tracing::trace;

use crate::catalog::Catalog;
use crate::config::MappingRule;
use crate::depexpr::{Comparison, DependencyExpression, Requirement};
use crate::primary::PackageRecord;
use crate::{Error, Result};

pub struct DependencyMapper<'a> {
    record: &'a PackageRecord,
    rule: &'a MappingRule,
    catalog: &'a Catalog,
}

impl<'a> DependencyMapper<'a> {
    pub fn new(record: &'a PackageRecord, rule: &'a MappingRule, catalog: &'a Catalog) -> Self {
        Self {
            record,
            rule,
            catalog,
        }
    }

    pub fn map(&self) -> Result<Vec<Requirement>> {
        let mut terms = Vec::new();
        for expr in &self.record.requires {
            terms.extend(self.flatten(expr)?);
        }

        let mut merged: BTreeMap<String, Requirement> = BTreeMap::new();
        for term in terms {
            let Some(requirement) = self.resolve(term)? else {
                continue;
            };
            match merged.get_mut(&requirement.name) {
                Some(existing) => {
                    if is_tighter(&requirement, existing) {
                        *existing = requirement;
                    }
                }
                None => {
                    merged.insert(requirement.name.clone(), requirement);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Steps 1 and 2 for a single name. `None` if the rule removes it.
    fn rewrite(&self, requirement: &Requirement) -> Option<Requirement> {
        if self.rule.remove.contains(&requirement.name) {
            trace!("{}: removed {}", self.record.name, requirement);
            return None;
        }
        match self.rule.replace.get(&requirement.name) {
            Some(target) => Some(requirement.substitute(target.as_str())),
            None => Some(requirement.clone()),
        }
    }

    /// Step 3: reduce an expression to the requirements it contributes
    fn flatten(&self, expr: &DependencyExpression) -> Result<Vec<Requirement>> {
        match expr {
            DependencyExpression::Leaf(requirement) => Ok(self.rewrite(requirement).into_iter().collect()),
            DependencyExpression::Not(_) => Ok(Vec::new()),
            DependencyExpression::And(children) => {
                let mut terms = Vec::new();
                for child in children {
                    terms.extend(self.flatten(child)?);
                }
                Ok(terms)
            }
            DependencyExpression::Or(children) => {
                let mut survivors = Vec::new();
                for child in children {
                    let terms = self.flatten(child)?;
                    if !terms.is_empty() {
                        survivors.push(terms);
                    }
                }
                match survivors.len() {
                    0 => Ok(Vec::new()),
                    1 => Ok(survivors.remove(0)),
                    _ => Err(Error::AmbiguousDependency {
                        package: self.record.name.clone(),
                        expression: expr.to_string(),
                        candidates: survivors.iter().flatten().map(|r| r.to_string()).collect(),
                    }),
                }
            }
        }
    }

    /// Step 4: map a term to a package of the catalog. A capability resolves
    /// to its provider, which is then subject to the rule like any other
    /// package name. `None` for removed providers and self references.
    fn resolve(&self, term: Requirement) -> Result<Option<Requirement>> {
        let requirement = if term.substituted || self.catalog.contains(&term.name) {
            term
        } else {
            match self.catalog.providers(&term.name).first() {
                Some(provider) => {
                    trace!("{}: {} provided by {}", self.record.name, term, provider);
                    match self.rewrite(&Requirement::unversioned(*provider)) {
                        Some(requirement) => requirement,
                        None => return Ok(None),
                    }
                }
                None => {
                    return Err(Error::UnmappedDependency {
                        package: self.record.name.clone(),
                        dependency: term.to_string(),
                    })
                }
            }
        };

        if requirement.name == self.record.name {
            return Ok(None);
        }
        Ok(Some(requirement))
    }
}

/// Map the requirements of `record` with `rule` against `catalog`.
pub fn map_dependencies(
    record: &PackageRecord,
    rule: &MappingRule,
    catalog: &Catalog,
) -> Result<Vec<Requirement>> {
    DependencyMapper::new(record, rule, catalog).map()
}

/// Whether `candidate` constrains more tightly than `current`.
fn is_tighter(candidate: &Requirement, current: &Requirement) -> bool {
    let (new, old) = match (&candidate.constraint, &current.constraint) {
        (Some(_), None) => return true,
        (None, _) => return false,
        (Some(new), Some(old)) => (new, old),
    };

    if old.op == Comparison::Eq {
        return false;
    }
    if new.op == Comparison::Eq {
        return true;
    }

    if new.op.is_lower_bound() && old.op.is_lower_bound() {
        return match new.evr.cmp(&old.evr) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => new.op == Comparison::Gt && old.op == Comparison::Ge,
            std::cmp::Ordering::Less => false,
        };
    }
    if new.op.is_upper_bound() && old.op.is_upper_bound() {
        return match new.evr.cmp(&old.evr) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => new.op == Comparison::Lt && old.op == Comparison::Le,
            std::cmp::Ordering::Greater => false,
        };
    }
    false
}
