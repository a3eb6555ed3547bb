//! Multi-compartment model with a spherical-harmonic FOD.
//!
//! Combines an ordered list of compartment kernels into one flat parameter
//! layout:
//!
//! 1. every non-orientation parameter of every kernel, named
//!    `<ModelName>_<k>_<param>` (`k` counts models of the same kind from 1)
//! 2. `sh_coeff` (FOD coefficients) if any kernel has an orientation
//! 3. `partial_volume_<i>` for every kernel, if there is more than one
//!
//! The orientation itself is not a parameter here: it is replaced by the FOD.
//! Parameter vectors use `None` as an "unset" placeholder.

use std::collections::BTreeMap;

use crate::domain::{ModelKind, ParameterEntry, ParameterMap, ParameterType};
use crate::error::CsdError;
use crate::math::n_coefficients;
use crate::models::compartment::{CompartmentModel, build_model};

pub const SH_COEFF: &str = "sh_coeff";

#[derive(Debug)]
pub struct MultiCompartmentModel {
    models: Vec<Box<dyn CompartmentModel>>,
    model_names: Vec<String>,
    sh_order: usize,
    layout: Vec<ParameterEntry>,
    /// `(model index, local name) → layout name`
    parameter_map: Vec<(usize, &'static str, String)>,
    fixed: ParameterMap,
    /// `(target, source)`: target takes the source's values.
    links: Vec<(String, String)>,
}

impl MultiCompartmentModel {
    pub fn new(models: Vec<Box<dyn CompartmentModel>>, sh_order: usize) -> Result<Self, CsdError> {
        if models.is_empty() {
            return Err(CsdError::NoModels);
        }
        if sh_order % 2 != 0 {
            return Err(CsdError::InvalidShOrder(sh_order));
        }

        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        let model_names: Vec<String> = models
            .iter()
            .map(|m| {
                let k = counts.entry(m.name()).or_insert(0);
                *k += 1;
                format!("{}_{}_", m.name(), k)
            })
            .collect();

        let mut layout = Vec::new();
        let mut parameter_map = Vec::new();
        for (i, (model, prefix)) in models.iter().zip(model_names.iter()).enumerate() {
            for spec in model.parameters() {
                if spec.kind == ParameterType::Orientation {
                    continue;
                }
                let name = format!("{prefix}{}", spec.name);
                layout.push(ParameterEntry {
                    name: name.clone(),
                    cardinality: spec.cardinality,
                    kind: spec.kind,
                });
                parameter_map.push((i, spec.name, name));
            }
        }
        if models.iter().any(|m| m.has_orientation()) {
            layout.push(ParameterEntry {
                name: SH_COEFF.to_string(),
                cardinality: n_coefficients(sh_order),
                kind: ParameterType::ShCoefficients,
            });
        }
        if models.len() > 1 {
            for i in 0..models.len() {
                layout.push(ParameterEntry {
                    name: format!("partial_volume_{i}"),
                    cardinality: 1,
                    kind: ParameterType::VolumeFraction,
                });
            }
        }

        Ok(Self {
            models,
            model_names,
            sh_order,
            layout,
            parameter_map,
            fixed: ParameterMap::new(),
            links: Vec::new(),
        })
    }

    /// Convenience constructor from model kinds.
    pub fn from_kinds(kinds: &[ModelKind], sh_order: usize) -> Result<Self, CsdError> {
        Self::new(kinds.iter().map(|&k| build_model(k)).collect(), sh_order)
    }

    pub fn models(&self) -> &[Box<dyn CompartmentModel>] {
        &self.models
    }

    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }

    pub fn sh_order(&self) -> usize {
        self.sh_order
    }

    pub fn layout(&self) -> &[ParameterEntry] {
        &self.layout
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.layout.iter().map(|e| e.name.as_str()).collect()
    }

    /// Total length of a parameter vector.
    pub fn n_parameters(&self) -> usize {
        self.layout.iter().map(|e| e.cardinality).sum()
    }

    pub fn parameter_cardinality(&self, name: &str) -> Option<usize> {
        self.entry(name).map(|e| e.cardinality)
    }

    pub fn partial_volume_names(&self) -> Vec<String> {
        self.layout
            .iter()
            .filter(|e| e.kind == ParameterType::VolumeFraction)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Layout name of a kernel's local parameter.
    pub fn parameter_name(&self, model: usize, local: &str) -> Option<&str> {
        self.parameter_map
            .iter()
            .find(|(m, l, _)| *m == model && *l == local)
            .map(|(_, _, g)| g.as_str())
    }

    pub fn orientation_count(&self) -> usize {
        self.models.iter().filter(|m| m.has_orientation()).count()
    }

    fn entry(&self, name: &str) -> Option<&ParameterEntry> {
        self.layout.iter().find(|e| e.name == name)
    }

    /// Hold a kernel parameter at a fixed value.
    pub fn set_fixed_parameter(&mut self, name: &str, values: Vec<f64>) -> Result<(), CsdError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| CsdError::UnknownParameter(name.to_string()))?;
        if entry.cardinality != values.len() {
            return Err(CsdError::DimensionMismatch {
                what: "parameter values",
                expected: entry.cardinality,
                found: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CsdError::InvalidParameter {
                name: name.to_string(),
                reason: "fixed values must be finite".into(),
            });
        }
        self.fixed.insert(name, values);
        Ok(())
    }

    /// Make `target` always equal to `source`.
    pub fn set_equal_parameter(&mut self, target: &str, source: &str) -> Result<(), CsdError> {
        let t = self
            .entry(target)
            .ok_or_else(|| CsdError::UnknownParameter(target.to_string()))?;
        let s = self
            .entry(source)
            .ok_or_else(|| CsdError::UnknownParameter(source.to_string()))?;
        if target == source {
            return Err(CsdError::InvalidParameter {
                name: target.to_string(),
                reason: "cannot link a parameter to itself".into(),
            });
        }
        if t.cardinality != s.cardinality {
            return Err(CsdError::DimensionMismatch {
                what: "linked parameter values",
                expected: t.cardinality,
                found: s.cardinality,
            });
        }
        self.links.push((target.to_string(), source.to_string()));
        Ok(())
    }

    /// Fixed values in layout form; everything else unset.
    pub fn initial_guess(&self) -> Vec<Option<f64>> {
        let mut out = Vec::with_capacity(self.n_parameters());
        for entry in &self.layout {
            match self.fixed.get(&entry.name) {
                Some(values) => out.extend(values.iter().map(|&v| Some(v))),
                None => out.extend(std::iter::repeat_n(None, entry.cardinality)),
            }
        }
        out
    }

    /// Split a flat vector into named values. Entries with any unset
    /// component are left out.
    pub fn parameter_vector_to_parameters(&self, vector: &[Option<f64>]) -> Result<ParameterMap, CsdError> {
        if vector.len() != self.n_parameters() {
            return Err(CsdError::DimensionMismatch {
                what: "parameter vector entries",
                expected: self.n_parameters(),
                found: vector.len(),
            });
        }

        let mut out = ParameterMap::new();
        let mut offset = 0;
        for entry in &self.layout {
            let slice = &vector[offset..offset + entry.cardinality];
            offset += entry.cardinality;
            if let Some(values) = slice.iter().copied().collect::<Option<Vec<f64>>>() {
                out.insert(entry.name.clone(), values);
            }
        }
        Ok(out)
    }

    /// Flatten named values back to the layout; absent entries become `None`.
    pub fn parameters_to_parameter_vector(&self, params: &ParameterMap) -> Result<Vec<Option<f64>>, CsdError> {
        if let Some((name, _)) = params.iter().find(|(name, _)| self.entry(name).is_none()) {
            return Err(CsdError::UnknownParameter(name.clone()));
        }

        let mut out = Vec::with_capacity(self.n_parameters());
        for entry in &self.layout {
            match params.get(&entry.name) {
                Some(values) => {
                    if values.len() != entry.cardinality {
                        return Err(CsdError::DimensionMismatch {
                            what: "parameter values",
                            expected: entry.cardinality,
                            found: values.len(),
                        });
                    }
                    out.extend(values.iter().map(|&v| Some(v)));
                }
                None => out.extend(std::iter::repeat_n(None, entry.cardinality)),
            }
        }
        Ok(out)
    }

    /// Apply fixed values and equality links.
    pub fn add_linked_parameters_to_parameters(&self, params: &ParameterMap) -> ParameterMap {
        let mut out = params.clone();
        for (name, values) in self.fixed.iter() {
            out.insert(name.clone(), values.clone());
        }
        for (target, source) in &self.links {
            if let Some(values) = out.get(source).map(|v| v.to_vec()) {
                out.insert(target.clone(), values);
            }
        }
        out
    }

    /// A kernel's own parameter values (local names), taken from a
    /// multi-compartment map.
    pub fn parameters_for_model(&self, model: usize, params: &ParameterMap) -> ParameterMap {
        self.parameter_map
            .iter()
            .filter(|(m, _, _)| *m == model)
            .filter_map(|(_, local, global)| params.get(global).map(|v| (local.to_string(), v.to_vec())))
            .collect()
    }

    /// Layout names a kernel needs before its rotational harmonics can be computed.
    pub fn required_parameters(&self, model: usize) -> impl Iterator<Item = &str> {
        self.parameter_map
            .iter()
            .filter(move |(m, _, _)| *m == model)
            .map(|(_, _, g)| g.as_str())
    }
}
