use crate::mutation::NodeId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Node {0} does not exist")]
    NodeNotFound(NodeId),

    #[error("Node {0} is not attached to the document")]
    Detached(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {0} cannot be removed")]
    NotRemovable(NodeId),

    #[error("Document is not available: {0}")]
    Unavailable(String),
}
