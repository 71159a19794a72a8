mod tests_context;
