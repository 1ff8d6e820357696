use crate::{Document, Object, ObjectId};

impl Document {
    /// Create new object id.
    pub fn new_object_id(&mut self) -> ObjectId {
        self.max_id += 1;
        (self.max_id, 0)
    }

    /// Add PDF object into document's object list.
    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        let id = self.new_object_id();
        self.objects.insert(id, object.into());
        id
    }

    /// Replace the object stored under `id`, returning the previous one.
    pub fn set_object<T: Into<Object>>(&mut self, id: ObjectId, object: T) -> Option<Object> {
        self.max_id = self.max_id.max(id.0);
        self.objects.insert(id, object.into())
    }
}
