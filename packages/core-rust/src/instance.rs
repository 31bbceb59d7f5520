//! Instances, result objects and the ordered result container shared by the
//! broker's aggregation and pagination paths.

use serde::{Deserialize, Serialize};

use crate::name::{CimName, NamespaceName};
use crate::path::ObjectPath;
use crate::schema::{Class, PropertyList, Qualifier};
use crate::types::Value;

/// One property value carried by an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: CimName,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_origin: Option<CimName>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub qualifiers: Vec<Qualifier>,
}

impl Property {
    #[must_use]
    pub fn new(name: CimName, value: Value) -> Self {
        Self {
            name,
            value,
            class_origin: None,
            qualifiers: Vec::new(),
        }
    }
}

/// An instance of a class, usually with its object path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub class_name: CimName,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<ObjectPath>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub qualifiers: Vec<Qualifier>,
}

impl Instance {
    #[must_use]
    pub fn new(class_name: CimName) -> Self {
        Self {
            class_name,
            path: None,
            properties: Vec::new(),
            qualifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: CimName, value: Value) -> Self {
        self.set_property(name, value);
        self
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name.eq_str(name))
            .map(|p| &p.value)
    }

    /// Sets or replaces a property value.
    pub fn set_property(&mut self, name: CimName, value: Value) {
        if let Some(existing) = self.properties.iter_mut().find(|p| p.name == name) {
            existing.value = value;
        } else {
            self.properties.push(Property::new(name, value));
        }
    }

    /// Applies the response-shaping flags of the original client request.
    pub fn shape(
        &mut self,
        include_qualifiers: bool,
        include_class_origin: bool,
        property_list: &PropertyList,
    ) {
        self.properties.retain(|p| property_list.includes(&p.name));
        if !include_qualifiers {
            self.qualifiers.clear();
            for p in &mut self.properties {
                p.qualifiers.clear();
            }
        }
        if !include_class_origin {
            for p in &mut self.properties {
                p.class_origin = None;
            }
        }
    }

    /// Visits the instance path and every reference-valued property.
    pub fn for_each_path_mut(&mut self, f: &mut dyn FnMut(&mut ObjectPath)) {
        if let Some(path) = &mut self.path {
            f(path);
        }
        for p in &mut self.properties {
            p.value.for_each_reference_mut(f);
        }
    }
}

/// Result of association traversal: an instance, or a class when the
/// traversal anchor was itself a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType", content = "object", rename_all = "camelCase")]
pub enum CimObject {
    Instance(Instance),
    Class(Class),
}

// ---------------------------------------------------------------------------
// ResponseData
// ---------------------------------------------------------------------------

/// The kind of content a [`ResponseData`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Instances,
    Paths,
    Objects,
}

/// Appending content of a different kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot append {found:?} content to {expected:?} content")]
pub struct ContentMismatch {
    pub expected: ContentKind,
    pub found: ContentKind,
}

/// Ordered result content for enumeration, traversal and query operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "camelCase")]
pub enum ResponseData {
    Instances(Vec<Instance>),
    Paths(Vec<ObjectPath>),
    Objects(Vec<CimObject>),
}

impl ResponseData {
    #[must_use]
    pub fn empty(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Instances => Self::Instances(Vec::new()),
            ContentKind::Paths => Self::Paths(Vec::new()),
            ContentKind::Objects => Self::Objects(Vec::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Instances(_) => ContentKind::Instances,
            Self::Paths(_) => ContentKind::Paths,
            Self::Objects(_) => ContentKind::Objects,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Instances(v) => v.len(),
            Self::Paths(v) => v.len(),
            Self::Objects(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves all items of `other` to the end of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentMismatch`] if the two containers hold different kinds.
    pub fn append(&mut self, other: Self) -> Result<(), ContentMismatch> {
        match (self, other) {
            (Self::Instances(a), Self::Instances(b)) => a.extend(b),
            (Self::Paths(a), Self::Paths(b)) => a.extend(b),
            (Self::Objects(a), Self::Objects(b)) => a.extend(b),
            (this, other) => {
                return Err(ContentMismatch {
                    expected: this.kind(),
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    /// Converts to another kind where that loses nothing the target can hold.
    ///
    /// Instances become objects or paths (instances without a path are
    /// dropped from a path list); objects become instances when every
    /// object is an instance.
    ///
    /// # Errors
    ///
    /// Returns [`ContentMismatch`] for paths to anything else, and for objects
    /// holding classes converted to instances or paths.
    pub fn into_kind(self, kind: ContentKind) -> Result<Self, ContentMismatch> {
        let found = self.kind();
        if found == kind {
            return Ok(self);
        }
        let mismatch = ContentMismatch {
            expected: kind,
            found,
        };
        match (self, kind) {
            (Self::Instances(v), ContentKind::Objects) => {
                Ok(Self::Objects(v.into_iter().map(CimObject::Instance).collect()))
            }
            (Self::Instances(v), ContentKind::Paths) => {
                Ok(Self::Paths(v.into_iter().filter_map(|i| i.path).collect()))
            }
            (Self::Objects(v), ContentKind::Instances) => v
                .into_iter()
                .map(|o| match o {
                    CimObject::Instance(i) => Ok(i),
                    CimObject::Class(_) => Err(mismatch.clone()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Instances),
            (Self::Objects(v), ContentKind::Paths) => v
                .into_iter()
                .map(|o| match o {
                    CimObject::Instance(Instance { path: Some(p), .. }) => Ok(p),
                    _ => Err(mismatch.clone()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Paths),
            _ => Err(mismatch),
        }
    }

    /// Removes and returns up to `n` items from the front.
    #[must_use]
    pub fn take_front(&mut self, n: usize) -> Self {
        fn split<T>(v: &mut Vec<T>, n: usize) -> Vec<T> {
            let n = n.min(v.len());
            v.drain(..n).collect()
        }
        match self {
            Self::Instances(v) => Self::Instances(split(v, n)),
            Self::Paths(v) => Self::Paths(split(v, n)),
            Self::Objects(v) => Self::Objects(split(v, n)),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::Instances(v) => v.clear(),
            Self::Paths(v) => v.clear(),
            Self::Objects(v) => v.clear(),
        }
    }

    /// Fills in missing host and namespace on every path in the content,
    /// including reference-valued properties.
    pub fn complete_paths(&mut self, host: &str, namespace: &NamespaceName) {
        let mut fix = |p: &mut ObjectPath| p.complete(host, namespace);
        match self {
            Self::Instances(v) => {
                for inst in v {
                    inst.for_each_path_mut(&mut fix);
                }
            }
            Self::Paths(v) => {
                for path in v {
                    fix(path);
                }
            }
            Self::Objects(v) => {
                for obj in v {
                    if let CimObject::Instance(inst) = obj {
                        inst.for_each_path_mut(&mut fix);
                    }
                }
            }
        }
    }

    /// Applies response-shaping flags to every instance in the content.
    pub fn shape_instances(
        &mut self,
        include_qualifiers: bool,
        include_class_origin: bool,
        property_list: &PropertyList,
    ) {
        self.for_each_instance_mut(|inst| {
            inst.shape(include_qualifiers, include_class_origin, property_list);
        });
    }

    pub fn for_each_instance_mut(&mut self, mut f: impl FnMut(&mut Instance)) {
        match self {
            Self::Instances(v) => v.iter_mut().for_each(&mut f),
            Self::Objects(v) => {
                for obj in v {
                    if let CimObject::Instance(inst) = obj {
                        f(inst);
                    }
                }
            }
            Self::Paths(_) => {}
        }
    }

    /// Keeps the instances for which `keep` returns true. Paths and classes
    /// are left untouched.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error produced by `keep`.
    pub fn try_retain_instances<E>(
        &mut self,
        mut keep: impl FnMut(&Instance) -> Result<bool, E>,
    ) -> Result<(), E> {
        match self {
            Self::Instances(v) => {
                let mut kept = Vec::with_capacity(v.len());
                for inst in v.drain(..) {
                    if keep(&inst)? {
                        kept.push(inst);
                    }
                }
                *v = kept;
            }
            Self::Objects(v) => {
                let mut kept = Vec::with_capacity(v.len());
                for obj in v.drain(..) {
                    let retain = match &obj {
                        CimObject::Instance(inst) => keep(inst)?,
                        CimObject::Class(_) => true,
                    };
                    if retain {
                        kept.push(obj);
                    }
                }
                *v = kept;
            }
            Self::Paths(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyBinding;

    fn name(s: &str) -> CimName {
        CimName::new(s).unwrap()
    }

    fn inst(id: u64) -> Instance {
        let path = ObjectPath::new(name("CIM_Foo"))
            .with_key(KeyBinding::new(name("Id"), Value::Uint(id)));
        Instance::new(name("CIM_Foo"))
            .with_path(path)
            .with_property(name("Id"), Value::Uint(id))
            .with_property(name("Caption"), Value::from("foo"))
    }

    #[test]
    fn append_rejects_mixed_kinds() {
        let mut data = ResponseData::Instances(vec![inst(1)]);
        let err = data
            .append(ResponseData::Paths(Vec::new()))
            .unwrap_err();
        assert_eq!(err.expected, ContentKind::Instances);
        assert_eq!(err.found, ContentKind::Paths);
        data.append(ResponseData::Instances(vec![inst(2)])).unwrap();
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn take_front_preserves_order() {
        let mut data = ResponseData::Instances((1..=5).map(inst).collect());
        let head = data.take_front(3);
        assert_eq!(head.len(), 3);
        assert_eq!(data.len(), 2);
        let ResponseData::Instances(rest) = data else {
            panic!("kind changed");
        };
        assert_eq!(rest[0].property("Id"), Some(&Value::Uint(4)));

        let mut small = ResponseData::Paths(Vec::new());
        assert!(small.take_front(10).is_empty());
    }

    #[test]
    fn complete_paths_covers_references() {
        let ns = NamespaceName::new("root/cimv2").unwrap();
        let target = inst(9).path.unwrap();
        let assoc = Instance::new(name("CIM_Dep"))
            .with_property(name("Antecedent"), Value::from(target));
        let mut data = ResponseData::Objects(vec![CimObject::Instance(assoc)]);
        data.complete_paths("host1", &ns);

        let ResponseData::Objects(objs) = data else {
            panic!("kind changed");
        };
        let CimObject::Instance(assoc) = &objs[0] else {
            panic!("expected instance");
        };
        let reference = assoc.property("Antecedent").and_then(Value::as_reference).unwrap();
        assert_eq!(reference.host.as_deref(), Some("host1"));
        assert_eq!(reference.namespace, Some(ns));
    }

    #[test]
    fn shape_applies_property_list() {
        let mut data = ResponseData::Instances(vec![inst(1)]);
        data.shape_instances(false, false, &PropertyList::only(vec![name("Id")]));
        let ResponseData::Instances(v) = data else {
            panic!("kind changed");
        };
        assert_eq!(v[0].properties.len(), 1);
        assert!(v[0].property("Caption").is_none());
    }

    #[test]
    fn try_retain_stops_on_error() {
        let mut data = ResponseData::Instances((1..=4).map(inst).collect());
        data.try_retain_instances::<()>(|i| Ok(i.property("Id") != Some(&Value::Uint(2))))
            .unwrap();
        assert_eq!(data.len(), 3);

        let err = data.try_retain_instances(|_| Err("bad"));
        assert_eq!(err, Err("bad"));
    }

    #[test]
    fn objects_convert_to_instances_only_without_classes() {
        let objects = ResponseData::Objects(vec![CimObject::Instance(inst(1))]);
        let converted = objects.into_kind(ContentKind::Instances).unwrap();
        assert_eq!(converted.kind(), ContentKind::Instances);

        let with_class = ResponseData::Objects(vec![CimObject::Class(Class::new(name("C")))]);
        assert!(with_class.into_kind(ContentKind::Instances).is_err());

        let paths = ResponseData::Instances(vec![inst(1), Instance::new(name("CIM_Foo"))])
            .into_kind(ContentKind::Paths)
            .unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let data = ResponseData::Paths(vec![ObjectPath::new(name("CIM_Foo"))]);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "paths");
        assert_eq!(json["items"][0]["className"], "CIM_Foo");

        let bytes = rmp_serde::to_vec_named(&data).unwrap();
        let back: ResponseData = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, data);
    }
}
