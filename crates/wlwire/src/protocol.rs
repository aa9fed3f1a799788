//! # Protocol Descriptor Tables
//!
//! The immutable metadata the dispatcher consumes: one [`InterfaceDescriptor`]
//! per interface, each with ordered request (method) and event descriptors
//! whose position is their opcode.
//!
//! ## Construction
//!
//! Interfaces may name themselves (or each other, cyclically) in their own
//! argument lists. Tables are therefore built in two phases: every interface is
//! first [`declare`](ProtocolBuilder::declare)d, which hands out a placeholder
//! [`InterfaceId`], and only then [`define`](ProtocolBuilder::define)d with
//! messages that refer to interfaces by id. Nothing recurses.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::signature::Signature;

/// Index of an interface within its [`Protocol`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

/// Which list of an interface a message lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server ("methods").
    Request,
    /// Server to client.
    Event,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Request => Self::Event,
            Self::Event => Self::Request,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Event => f.write_str("event"),
        }
    }
}

/// A single request or event.
#[derive(Clone, Debug)]
pub struct MessageDescriptor {
    pub name: String,
    pub opcode: u16,
    pub signature: Signature,
    /// One entry per argument; `Some` for typed `o`/`n` arguments.
    pub arg_interfaces: Vec<Option<InterfaceId>>,
}

impl std::fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.signature)
    }
}

/// A named capability surface.
#[derive(Clone, Debug)]
pub struct InterfaceDescriptor {
    pub id: InterfaceId,
    pub name: String,
    pub version: u32,
    pub methods: Vec<MessageDescriptor>,
    pub events: Vec<MessageDescriptor>,
}

impl InterfaceDescriptor {
    pub fn messages(&self, direction: Direction) -> &[MessageDescriptor] {
        match direction {
            Direction::Request => &self.methods,
            Direction::Event => &self.events,
        }
    }

    pub fn message(&self, direction: Direction, opcode: u16) -> Option<&MessageDescriptor> {
        self.messages(direction).get(usize::from(opcode))
    }
}

/// A complete, immutable descriptor table.
#[derive(Debug)]
pub struct Protocol {
    name: String,
    interfaces: Vec<InterfaceDescriptor>,
    by_name: HashMap<String, InterfaceId>,
}

impl Protocol {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, id: InterfaceId) -> Option<&InterfaceDescriptor> {
        self.interfaces.get(id.0 as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<InterfaceId> {
        self.by_name.get(name).copied()
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.interfaces.iter()
    }

    /// Returns a shareable reference to the named interface.
    pub fn interface(self: &Arc<Self>, name: &str) -> Result<InterfaceRef> {
        let id = self.lookup(name).ok_or_else(|| Error::UnknownInterface(name.to_string()))?;
        Ok(InterfaceRef { protocol: Arc::clone(self), id })
    }

    /// Returns a shareable reference by id, if the id belongs to this table.
    pub fn interface_by_id(self: &Arc<Self>, id: InterfaceId) -> Option<InterfaceRef> {
        self.get(id)?;
        Some(InterfaceRef { protocol: Arc::clone(self), id })
    }
}

/// A cheap, clonable handle to one interface of a [`Protocol`].
#[derive(Clone)]
pub struct InterfaceRef {
    protocol: Arc<Protocol>,
    id: InterfaceId,
}

impl InterfaceRef {
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// Resolves the interface declared for argument `index` of `message`.
    pub fn arg_interface(&self, message: &MessageDescriptor, index: usize) -> Option<InterfaceRef> {
        let id = message.arg_interfaces.get(index).copied().flatten()?;
        self.protocol.interface_by_id(id)
    }
}

impl Deref for InterfaceRef {
    type Target = InterfaceDescriptor;

    fn deref(&self) -> &InterfaceDescriptor {
        // Ids are only minted by `Protocol`, for interfaces it owns.
        &self.protocol.interfaces[self.id.0 as usize]
    }
}

impl PartialEq for InterfaceRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.protocol, &other.protocol) && self.id == other.id
    }
}

impl Eq for InterfaceRef {}

impl std::fmt::Debug for InterfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

impl std::fmt::Display for InterfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The declaration of a message, before it is checked and numbered.
#[derive(Clone, Debug)]
pub struct MessageSpec {
    name: String,
    signature: String,
    arg_interfaces: Option<Vec<Option<InterfaceId>>>,
}

impl MessageSpec {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            arg_interfaces: None,
        }
    }

    /// Sets the per-argument interfaces. Without this, every argument is untyped.
    pub fn interfaces(mut self, arg_interfaces: impl IntoIterator<Item = Option<InterfaceId>>) -> Self {
        self.arg_interfaces = Some(arg_interfaces.into_iter().collect());
        self
    }

    fn into_descriptor(self, opcode: u16, declared: usize) -> Result<MessageDescriptor> {
        let signature = Signature::parse(&self.signature)?;
        let arg_interfaces = match self.arg_interfaces {
            Some(list) => list,
            None => vec![None; signature.len()],
        };
        if arg_interfaces.len() != signature.len() {
            return Err(Error::ArgInterfaceCountMismatch {
                message: self.name,
                arguments: signature.len(),
                interfaces: arg_interfaces.len(),
            });
        }
        if let Some(bad) = arg_interfaces.iter().flatten().find(|id| id.0 as usize >= declared) {
            return Err(Error::UnknownInterface(format!("#{}", bad.0)));
        }
        Ok(MessageDescriptor {
            name: self.name,
            opcode,
            signature,
            arg_interfaces,
        })
    }
}

struct Declared {
    name: String,
    version: u32,
    messages: Option<(Vec<MessageSpec>, Vec<MessageSpec>)>,
}

/// Two-phase builder for a [`Protocol`].
pub struct ProtocolBuilder {
    name: String,
    declared: Vec<Declared>,
    by_name: HashMap<String, InterfaceId>,
}

impl ProtocolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Allocates a placeholder for an interface. Declaring a name twice returns
    /// the id handed out the first time.
    pub fn declare(&mut self, name: &str, version: u32) -> InterfaceId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = InterfaceId(self.declared.len() as u32);
        self.declared.push(Declared {
            name: name.to_string(),
            version,
            messages: None,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Fills in the requests and events of a declared interface.
    pub fn define(
        &mut self,
        id: InterfaceId,
        methods: impl IntoIterator<Item = MessageSpec>,
        events: impl IntoIterator<Item = MessageSpec>,
    ) -> Result<&mut Self> {
        let slot = self
            .declared
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::UnknownInterface(format!("#{}", id.0)))?;
        slot.messages = Some((methods.into_iter().collect(), events.into_iter().collect()));
        Ok(self)
    }

    /// Checks every declaration and freezes the table.
    pub fn build(self) -> Result<Arc<Protocol>> {
        let declared = self.declared.len();
        let mut interfaces = Vec::with_capacity(declared);

        for (index, decl) in self.declared.into_iter().enumerate() {
            let (methods, events) = decl.messages.ok_or_else(|| Error::UndefinedInterface(decl.name.clone()))?;
            let number = |specs: Vec<MessageSpec>| -> Result<Vec<MessageDescriptor>> {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(opcode, spec)| spec.into_descriptor(opcode as u16, declared))
                    .collect()
            };
            interfaces.push(InterfaceDescriptor {
                id: InterfaceId(index as u32),
                name: decl.name,
                version: decl.version,
                methods: number(methods)?,
                events: number(events)?,
            });
        }

        Ok(Arc::new(Protocol {
            name: self.name,
            interfaces,
            by_name: self.by_name,
        }))
    }
}
