mod tests_edit;
mod tests_find_file;
