//! In-memory [`ObjectStore`] backed by [`DashMap`].
//!
//! Holds classes, qualifier declarations and instances per namespace, and
//! answers association traversal from the reference properties of stored
//! association instances.

use std::collections::BTreeMap;

use dashmap::{DashMap, DashSet};
use wbem_core::messages::{
    AssociatorNamesRequest, AssociatorsRequest, EnumerateClassNamesRequest,
    EnumerateClassesRequest, EnumerateInstancesRequest, GetClassRequest, GetInstanceRequest,
    ModifyInstanceRequest, ReferenceNamesRequest, ReferencesRequest,
};
use wbem_core::{
    CimName, CimObject, Class, Instance, KeyBinding, NamespaceName, ObjectPath, QualifierDecl,
    StatusCode, Value,
};

use crate::service::operation::OperationError;
use crate::traits::ObjectStore;

type Key = (NamespaceName, CimName);

/// Longest superclass chain followed before giving up.
const MAX_CLASS_DEPTH: usize = 64;

/// Concurrent in-memory class and instance repository.
pub struct MemoryObjectStore {
    namespaces: DashSet<NamespaceName>,
    classes: DashMap<Key, Class>,
    qualifiers: DashMap<Key, QualifierDecl>,
    /// Instances per concrete class, keyed by canonical path.
    instances: DashMap<Key, BTreeMap<String, Instance>>,
    default_instance_provider: bool,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new(default_instance_provider: bool) -> Self {
        Self {
            namespaces: DashSet::new(),
            classes: DashMap::new(),
            qualifiers: DashMap::new(),
            instances: DashMap::new(),
            default_instance_provider,
        }
    }

    pub fn add_namespace(&self, ns: NamespaceName) {
        self.namespaces.insert(ns);
    }

    /// Creates the namespace if needed and adds `class` to it.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::create_class`].
    pub fn add_class(&self, ns: &NamespaceName, class: Class) -> Result<(), OperationError> {
        self.add_namespace(ns.clone());
        self.create_class(ns, class)
    }

    fn check_namespace(&self, ns: &NamespaceName) -> Result<(), OperationError> {
        if self.namespaces.contains(ns) {
            Ok(())
        } else {
            Err(OperationError::InvalidNamespace {
                namespace: ns.to_string(),
            })
        }
    }

    fn class(&self, ns: &NamespaceName, name: &CimName) -> Option<Class> {
        self.classes
            .get(&(ns.clone(), name.clone()))
            .map(|c| c.value().clone())
    }

    fn require_class(&self, ns: &NamespaceName, name: &CimName) -> Result<Class, OperationError> {
        self.check_namespace(ns)?;
        self.class(ns, name).ok_or_else(|| OperationError::InvalidClass {
            class_name: name.to_string(),
        })
    }

    /// Every class in `ns`, sorted by name.
    fn classes_in(&self, ns: &NamespaceName) -> Vec<Class> {
        let mut out: Vec<Class> = self
            .classes
            .iter()
            .filter(|e| e.key().0 == *ns)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Subclasses of `parent` (top-level classes for `None`) in depth-first
    /// order.
    fn subclass_names(
        &self,
        ns: &NamespaceName,
        parent: Option<&CimName>,
        deep: bool,
    ) -> Vec<CimName> {
        let all = self.classes_in(ns);
        let mut out = Vec::new();
        collect_subclasses(&all, parent, deep, &mut out);
        out
    }

    fn is_subclass_of(&self, ns: &NamespaceName, class: &CimName, ancestor: &CimName) -> bool {
        let mut current = Some(class.clone());
        for _ in 0..MAX_CLASS_DEPTH {
            let Some(name) = current else {
                return false;
            };
            if name == *ancestor {
                return true;
            }
            current = self.class(ns, &name).and_then(|c| c.super_class);
        }
        false
    }

    fn instances_of(&self, ns: &NamespaceName, class: &CimName) -> Vec<Instance> {
        self.instances
            .get(&(ns.clone(), class.clone()))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn find_instance(&self, ns: &NamespaceName, path: &ObjectPath) -> Option<Instance> {
        self.instances
            .get(&(ns.clone(), path.class_name.clone()))
            .and_then(|m| m.get(&path.to_local().canonical_key()).cloned())
    }

    fn require_instance(
        &self,
        ns: &NamespaceName,
        path: &ObjectPath,
    ) -> Result<Instance, OperationError> {
        self.check_namespace(ns)?;
        self.find_instance(ns, path)
            .ok_or_else(|| OperationError::NotFound {
                message: format!("instance {path}"),
            })
    }

    fn association_classes(&self, ns: &NamespaceName, filter: Option<&CimName>) -> Vec<Class> {
        self.classes_in(ns)
            .into_iter()
            .filter(|c| c.is_association())
            .filter(|c| filter.is_none_or(|f| self.is_subclass_of(ns, &c.name, f)))
            .collect()
    }

    /// Association classes with a reference (through `role`) that can point
    /// at `anchor_class`, with the matching property name.
    fn referencing_classes(
        &self,
        ns: &NamespaceName,
        anchor_class: &CimName,
        assoc_filter: Option<&CimName>,
        role: Option<&str>,
    ) -> Vec<(Class, CimName)> {
        let mut out = Vec::new();
        for class in self.association_classes(ns, assoc_filter) {
            let via = class
                .references(role)
                .find(|p| {
                    p.reference_class
                        .as_ref()
                        .is_some_and(|target| self.is_subclass_of(ns, anchor_class, target))
                })
                .map(|p| p.name.clone());
            if let Some(via) = via {
                out.push((class, via));
            }
        }
        out
    }

    /// Association instances with a reference (through `role`) to `anchor`.
    fn referencing_instances(
        &self,
        ns: &NamespaceName,
        anchor: &ObjectPath,
        assoc_filter: Option<&CimName>,
        role: Option<&str>,
    ) -> Vec<(Instance, CimName)> {
        let mut out = Vec::new();
        for class in self.association_classes(ns, assoc_filter) {
            let refs: Vec<CimName> = class.references(role).map(|p| p.name.clone()).collect();
            for inst in self.instances_of(ns, &class.name) {
                let via = refs.iter().find(|r| {
                    inst.property(r.as_str())
                        .and_then(Value::as_reference)
                        .is_some_and(|p| p.identifies_same(anchor))
                });
                if let Some(via) = via.cloned() {
                    out.push((inst, via));
                }
            }
        }
        out
    }

    /// Far-end paths of instance associations of `anchor`.
    fn associated_paths(
        &self,
        ns: &NamespaceName,
        anchor: &ObjectPath,
        assoc_class: Option<&CimName>,
        result_class: Option<&CimName>,
        role: Option<&str>,
        result_role: Option<&str>,
    ) -> Vec<ObjectPath> {
        let mut out: Vec<ObjectPath> = Vec::new();
        for (assoc, via) in self.referencing_instances(ns, anchor, assoc_class, role) {
            let Some(class) = self.class(ns, &assoc.class_name) else {
                continue;
            };
            for prop in class.references(result_role).filter(|p| p.name != via) {
                let Some(target) = assoc.property(prop.name.as_str()).and_then(Value::as_reference)
                else {
                    continue;
                };
                let wanted = result_class
                    .is_none_or(|rc| self.is_subclass_of(ns, &target.class_name, rc));
                if wanted && !out.iter().any(|p| p.identifies_same(target)) {
                    out.push(target.to_local());
                }
            }
        }
        out
    }

    /// Far-end classes of class-level associations of `anchor_class`.
    fn associated_classes(
        &self,
        ns: &NamespaceName,
        anchor_class: &CimName,
        assoc_class: Option<&CimName>,
        result_class: Option<&CimName>,
        role: Option<&str>,
        result_role: Option<&str>,
    ) -> Vec<Class> {
        let mut out: Vec<Class> = Vec::new();
        for (assoc, via) in self.referencing_classes(ns, anchor_class, assoc_class, role) {
            for prop in assoc.references(result_role).filter(|p| p.name != via) {
                let Some(target) = prop.reference_class.as_ref() else {
                    continue;
                };
                let wanted =
                    result_class.is_none_or(|rc| self.is_subclass_of(ns, target, rc));
                if wanted && !out.iter().any(|c| c.name == *target) {
                    if let Some(class) = self.class(ns, target) {
                        out.push(class);
                    }
                }
            }
        }
        out
    }

    /// Builds the model path of `instance` from its class's key properties.
    fn instance_path(class: &Class, instance: &Instance) -> Result<ObjectPath, OperationError> {
        let mut path = ObjectPath::new(class.name.clone());
        for key in class.key_properties() {
            let value = instance
                .property(key.name.as_str())
                .filter(|v| !v.is_null())
                .or_else(|| instance.path.as_ref().and_then(|p| p.key(key.name.as_str())))
                .ok_or_else(|| {
                    OperationError::invalid_parameter(format!(
                        "key property {} of {} has no value",
                        key.name, class.name
                    ))
                })?;
            path = path.with_key(KeyBinding::new(key.name.clone(), value.clone()));
        }
        Ok(path)
    }
}

fn collect_subclasses(
    all: &[Class],
    parent: Option<&CimName>,
    deep: bool,
    out: &mut Vec<CimName>,
) {
    for class in all.iter().filter(|c| c.super_class.as_ref() == parent) {
        out.push(class.name.clone());
        if deep {
            collect_subclasses(all, Some(&class.name), deep, out);
        }
    }
}

fn status(code: StatusCode, message: impl Into<String>) -> OperationError {
    OperationError::Status {
        code,
        message: message.into(),
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_class(&self, ns: &NamespaceName, req: &GetClassRequest) -> Result<Class, OperationError> {
        self.check_namespace(ns)?;
        let class = self
            .class(ns, &req.class_name)
            .ok_or_else(|| OperationError::NotFound {
                message: format!("class {}", req.class_name),
            })?;
        Ok(class.shaped(
            req.local_only,
            req.include_qualifiers,
            req.include_class_origin,
            &req.property_list,
        ))
    }

    fn enumerate_classes(
        &self,
        ns: &NamespaceName,
        req: &EnumerateClassesRequest,
    ) -> Result<Vec<Class>, OperationError> {
        let names = self.enumerate_class_names(
            ns,
            &EnumerateClassNamesRequest {
                class_name: req.class_name.clone(),
                deep_inheritance: req.deep_inheritance,
            },
        )?;
        let all = wbem_core::PropertyList::all();
        Ok(names
            .iter()
            .filter_map(|n| self.class(ns, n))
            .map(|c| {
                c.shaped(
                    req.local_only,
                    req.include_qualifiers,
                    req.include_class_origin,
                    &all,
                )
            })
            .collect())
    }

    fn enumerate_class_names(
        &self,
        ns: &NamespaceName,
        req: &EnumerateClassNamesRequest,
    ) -> Result<Vec<CimName>, OperationError> {
        self.check_namespace(ns)?;
        if let Some(class) = &req.class_name {
            self.require_class(ns, class)?;
        }
        Ok(self.subclass_names(ns, req.class_name.as_ref(), req.deep_inheritance))
    }

    fn create_class(&self, ns: &NamespaceName, class: Class) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        let key = (ns.clone(), class.name.clone());
        if self.classes.contains_key(&key) {
            return Err(status(StatusCode::AlreadyExists, format!("class {}", class.name)));
        }
        let mut class = class;
        let own_name = class.name.clone();
        for p in &mut class.properties {
            p.class_origin.get_or_insert_with(|| own_name.clone());
        }
        if let Some(super_name) = &class.super_class {
            let parent = self.class(ns, super_name).ok_or_else(|| {
                status(StatusCode::InvalidSuperclass, format!("superclass {super_name}"))
            })?;
            for inherited in parent.properties {
                if class.property(inherited.name.as_str()).is_none() {
                    class.properties.push(inherited);
                }
            }
        }
        self.classes.insert(key, class);
        Ok(())
    }

    fn modify_class(&self, ns: &NamespaceName, class: Class) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        let key = (ns.clone(), class.name.clone());
        match self.classes.get_mut(&key) {
            Some(mut existing) => {
                *existing = class;
                Ok(())
            }
            None => Err(OperationError::NotFound {
                message: format!("class {}", class.name),
            }),
        }
    }

    fn delete_class(&self, ns: &NamespaceName, class: &CimName) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        let key = (ns.clone(), class.clone());
        if !self.classes.contains_key(&key) {
            return Err(OperationError::NotFound {
                message: format!("class {class}"),
            });
        }
        if !self.subclass_names(ns, Some(class), false).is_empty() {
            return Err(status(StatusCode::ClassHasChildren, format!("class {class}")));
        }
        if self.instances.get(&key).is_some_and(|m| !m.is_empty()) {
            return Err(status(StatusCode::ClassHasInstances, format!("class {class}")));
        }
        self.classes.remove(&key);
        self.instances.remove(&key);
        Ok(())
    }

    fn get_qualifier(
        &self,
        ns: &NamespaceName,
        name: &CimName,
    ) -> Result<QualifierDecl, OperationError> {
        self.check_namespace(ns)?;
        self.qualifiers
            .get(&(ns.clone(), name.clone()))
            .map(|q| q.value().clone())
            .ok_or_else(|| OperationError::NotFound {
                message: format!("qualifier {name}"),
            })
    }

    fn set_qualifier(&self, ns: &NamespaceName, decl: QualifierDecl) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        self.qualifiers.insert((ns.clone(), decl.name.clone()), decl);
        Ok(())
    }

    fn delete_qualifier(&self, ns: &NamespaceName, name: &CimName) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        self.qualifiers
            .remove(&(ns.clone(), name.clone()))
            .map(|_| ())
            .ok_or_else(|| OperationError::NotFound {
                message: format!("qualifier {name}"),
            })
    }

    fn enumerate_qualifiers(&self, ns: &NamespaceName) -> Result<Vec<QualifierDecl>, OperationError> {
        self.check_namespace(ns)?;
        let mut out: Vec<QualifierDecl> = self
            .qualifiers
            .iter()
            .filter(|e| e.key().0 == *ns)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn get_instance(
        &self,
        ns: &NamespaceName,
        req: &GetInstanceRequest,
    ) -> Result<Instance, OperationError> {
        let mut instance = self.require_instance(ns, &req.instance_name)?;
        instance.shape(
            req.include_qualifiers,
            req.include_class_origin,
            &req.property_list,
        );
        Ok(instance)
    }

    fn enumerate_instances_for_class(
        &self,
        ns: &NamespaceName,
        req: &EnumerateInstancesRequest,
    ) -> Result<Vec<Instance>, OperationError> {
        self.require_class(ns, &req.class_name)?;
        Ok(self.instances_of(ns, &req.class_name))
    }

    fn enumerate_instance_names_for_class(
        &self,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Result<Vec<ObjectPath>, OperationError> {
        self.require_class(ns, class)?;
        Ok(self
            .instances_of(ns, class)
            .into_iter()
            .filter_map(|i| i.path)
            .collect())
    }

    fn create_instance(
        &self,
        ns: &NamespaceName,
        instance: Instance,
    ) -> Result<ObjectPath, OperationError> {
        let class = self.require_class(ns, &instance.class_name)?;
        let path = Self::instance_path(&class, &instance)?;
        let key = path.canonical_key();
        let mut entry = self
            .instances
            .entry((ns.clone(), class.name.clone()))
            .or_default();
        if entry.contains_key(&key) {
            return Err(status(StatusCode::AlreadyExists, format!("instance {path}")));
        }
        let mut instance = instance;
        instance.path = Some(path.clone());
        entry.insert(key, instance);
        Ok(path)
    }

    fn modify_instance(
        &self,
        ns: &NamespaceName,
        req: &ModifyInstanceRequest,
    ) -> Result<(), OperationError> {
        let modified = &req.modified_instance;
        let path = modified
            .path
            .as_ref()
            .ok_or_else(|| OperationError::invalid_parameter("modified instance has no path"))?;
        self.require_instance(ns, path)?;
        let key = (ns.clone(), path.class_name.clone());
        let mut entry = self.instances.get_mut(&key).ok_or_else(|| OperationError::NotFound {
            message: format!("instance {path}"),
        })?;
        let target = entry
            .get_mut(&path.to_local().canonical_key())
            .ok_or_else(|| OperationError::NotFound {
                message: format!("instance {path}"),
            })?;
        for prop in &modified.properties {
            if req.property_list.includes(&prop.name) {
                target.set_property(prop.name.clone(), prop.value.clone());
            }
        }
        if req.include_qualifiers {
            target.qualifiers.clone_from(&modified.qualifiers);
        }
        Ok(())
    }

    fn delete_instance(&self, ns: &NamespaceName, path: &ObjectPath) -> Result<(), OperationError> {
        self.check_namespace(ns)?;
        let removed = self
            .instances
            .get_mut(&(ns.clone(), path.class_name.clone()))
            .and_then(|mut m| m.remove(&path.to_local().canonical_key()));
        removed.map(|_| ()).ok_or_else(|| OperationError::NotFound {
            message: format!("instance {path}"),
        })
    }

    fn get_property(
        &self,
        ns: &NamespaceName,
        path: &ObjectPath,
        property: &CimName,
    ) -> Result<Value, OperationError> {
        let instance = self.require_instance(ns, path)?;
        instance
            .property(property.as_str())
            .cloned()
            .ok_or_else(|| status(StatusCode::NoSuchProperty, format!("property {property}")))
    }

    fn set_property(
        &self,
        ns: &NamespaceName,
        path: &ObjectPath,
        property: &CimName,
        value: Value,
    ) -> Result<(), OperationError> {
        let instance = self.require_instance(ns, path)?;
        let declared = self
            .class(ns, &instance.class_name)
            .is_some_and(|c| c.property(property.as_str()).is_some());
        if !declared && instance.property(property.as_str()).is_none() {
            return Err(status(StatusCode::NoSuchProperty, format!("property {property}")));
        }
        if let Some(mut entry) = self
            .instances
            .get_mut(&(ns.clone(), path.class_name.clone()))
        {
            if let Some(target) = entry.get_mut(&path.to_local().canonical_key()) {
                target.set_property(property.clone(), value);
            }
        }
        Ok(())
    }

    fn associators(
        &self,
        ns: &NamespaceName,
        req: &AssociatorsRequest,
    ) -> Result<Vec<CimObject>, OperationError> {
        self.check_namespace(ns)?;
        let anchor = &req.object_name;
        if anchor.is_class_path() {
            return Ok(self
                .associated_classes(
                    ns,
                    &anchor.class_name,
                    req.assoc_class.as_ref(),
                    req.result_class.as_ref(),
                    req.role.as_deref(),
                    req.result_role.as_deref(),
                )
                .into_iter()
                .map(CimObject::Class)
                .collect());
        }
        Ok(self
            .associated_paths(
                ns,
                anchor,
                req.assoc_class.as_ref(),
                req.result_class.as_ref(),
                req.role.as_deref(),
                req.result_role.as_deref(),
            )
            .iter()
            .filter_map(|p| self.find_instance(ns, p))
            .map(CimObject::Instance)
            .collect())
    }

    fn associator_names(
        &self,
        ns: &NamespaceName,
        req: &AssociatorNamesRequest,
    ) -> Result<Vec<ObjectPath>, OperationError> {
        self.check_namespace(ns)?;
        let anchor = &req.object_name;
        if anchor.is_class_path() {
            return Ok(self
                .associated_classes(
                    ns,
                    &anchor.class_name,
                    req.assoc_class.as_ref(),
                    req.result_class.as_ref(),
                    req.role.as_deref(),
                    req.result_role.as_deref(),
                )
                .into_iter()
                .map(|c| ObjectPath::new(c.name))
                .collect());
        }
        Ok(self.associated_paths(
            ns,
            anchor,
            req.assoc_class.as_ref(),
            req.result_class.as_ref(),
            req.role.as_deref(),
            req.result_role.as_deref(),
        ))
    }

    fn references(
        &self,
        ns: &NamespaceName,
        req: &ReferencesRequest,
    ) -> Result<Vec<CimObject>, OperationError> {
        self.check_namespace(ns)?;
        let anchor = &req.object_name;
        if anchor.is_class_path() {
            return Ok(self
                .referencing_classes(ns, &anchor.class_name, req.result_class.as_ref(), req.role.as_deref())
                .into_iter()
                .map(|(c, _)| CimObject::Class(c))
                .collect());
        }
        Ok(self
            .referencing_instances(ns, anchor, req.result_class.as_ref(), req.role.as_deref())
            .into_iter()
            .map(|(i, _)| CimObject::Instance(i))
            .collect())
    }

    fn reference_names(
        &self,
        ns: &NamespaceName,
        req: &ReferenceNamesRequest,
    ) -> Result<Vec<ObjectPath>, OperationError> {
        self.check_namespace(ns)?;
        let anchor = &req.object_name;
        if anchor.is_class_path() {
            return Ok(self
                .referencing_classes(ns, &anchor.class_name, req.result_class.as_ref(), req.role.as_deref())
                .into_iter()
                .map(|(c, _)| ObjectPath::new(c.name))
                .collect());
        }
        Ok(self
            .referencing_instances(ns, anchor, req.result_class.as_ref(), req.role.as_deref())
            .into_iter()
            .filter_map(|(i, _)| i.path)
            .collect())
    }

    fn is_default_instance_provider(&self) -> bool {
        self.default_instance_provider
    }
}
