//! The party on whose behalf an operation is performed.

use std::fmt;

use crate::commons::api::OperatorId;

/// An authenticated operator plus the capabilities relevant to signing.
///
/// Authentication itself happens before docsign is invoked, the caller
/// resolves the operator and whether they hold the administrative
/// capability.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Actor {
    operator: OperatorId,
    admin: bool,
}

impl Actor {
    pub fn operator(operator: OperatorId) -> Self {
        Actor { operator, admin: false }
    }

    pub fn admin(operator: OperatorId) -> Self {
        Actor { operator, admin: true }
    }

    pub fn id(&self) -> &OperatorId {
        &self.operator
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.admin {
            write!(f, "{} (admin)", self.operator)
        } else {
            self.operator.fmt(f)
        }
    }
}
